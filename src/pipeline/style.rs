//! Stylesheet and page-document generation.
//!
//! The canvas root is pinned to the capture size with `overflow: hidden`;
//! content lives in a vertically centred `.content` column that scrolls
//! instead of growing the canvas. Every size comes from a [`TypeScale`].

use std::fmt::Write as _;

use super::typography::TypeScale;
use super::CanvasGeometry;

const MONO_STACK: &str = "'SFMono-Regular', Consolas, 'Liberation Mono', Menlo, monospace";

const BASE_RULES: &str = r#"
* { box-sizing: border-box; margin: 0; padding: 0; }
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, 'PingFang SC', 'Noto Sans CJK SC', sans-serif;
  line-height: 1.6;
  color: #333;
  display: flex;
  flex-direction: column;
  justify-content: center;
  align-items: center;
  padding: 60px;
}
.content {
  width: 100%;
  max-width: 840px;
  margin: auto;
  height: 100%;
  display: flex;
  flex-direction: column;
  justify-content: center;
  overflow-y: auto;
  padding-right: 40px;
}
.content::-webkit-scrollbar { width: 8px; }
.content::-webkit-scrollbar-track { background: #f1f1f1; border-radius: 4px; }
.content::-webkit-scrollbar-thumb { background: #888; border-radius: 4px; }
h1 {
  line-height: 1.3;
  color: #1a1a1a;
  font-weight: 800;
  text-align: center;
  position: relative;
}
h1::after {
  content: '';
  position: absolute;
  bottom: 0;
  left: 50%;
  transform: translateX(-50%);
  height: 4px;
  background: linear-gradient(90deg, #FF2442, #FF6B6B);
  border-radius: 2px;
}
h1 span.highlight {
  color: #1a1a1a;
  font-weight: 900;
  position: relative;
  display: inline-block;
  background: linear-gradient(transparent 60%, #FFFACD 60%);
  padding: 0 4px;
  border-radius: 2px;
}
h1 span.highlight::after {
  content: '';
  position: absolute;
  bottom: -2px;
  left: 0;
  width: 100%;
  height: 12px;
  background: rgb(255, 166, 0);
  transform: skew(-10deg);
  z-index: -1;
}
h1 span.highlight:nth-child(odd)::after { background: rgb(255, 255, 0); }
h2, h3 { line-height: 1.3; color: #1a1a1a; }
p, li { color: #333; }
img { max-width: 100%; height: auto; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
blockquote { border-left: 4px solid #FF2442; color: #666; font-style: italic; }
code { background: #f5f5f5; padding: 2px 6px; border-radius: 4px; }
pre { background: #1e1e1e; border-radius: 8px; overflow-x: auto; position: relative; }
pre[data-language]::before { content: attr(data-language); position: absolute; color: #888; }
pre code { background: none; padding: 0; color: #c0c5ce; white-space: pre-wrap; word-wrap: break-word; }
a { color: #FF2442; text-decoration: none; }
table { width: 100%; border-collapse: collapse; }
th, td { border: 1px solid #ddd; text-align: left; }
th { background: #f5f5f5; font-weight: 600; }
hr { border: none; border-top: 1px solid #eee; }
li input[type="checkbox"] { margin-right: 0.4em; }
"#;

/// Build the full stylesheet for one page.
///
/// `highlight_css` is appended verbatim (see
/// [`super::highlight::theme_css`]).
pub fn stylesheet(scale: &TypeScale, canvas: &CanvasGeometry, highlight_css: &str) -> String {
    let mut css = String::with_capacity(BASE_RULES.len() + highlight_css.len() + 2048);
    let w = canvas.width;
    let h = canvas.height;
    let base = scale.base;

    // Writing into a String cannot fail.
    let _ = writeln!(
        css,
        "html, body {{ width: {w}px; height: {h}px; margin: 0; padding: 0; overflow: hidden; background: white; }}"
    );
    css.push_str(BASE_RULES);

    let _ = writeln!(
        css,
        "h1 {{ font-size: {}px; margin-bottom: {}px; padding-bottom: {}px; }}",
        px(scale.h1()),
        px(scale.block_margin()),
        px(scale.h1_padding()),
    );
    let _ = writeln!(css, "h1::after {{ width: {}px; }}", px(scale.h1_underline()));
    let _ = writeln!(
        css,
        "h2 {{ font-size: {}px; margin-bottom: {}px; }}",
        px(scale.h2()),
        px(scale.h2_margin())
    );
    let _ = writeln!(
        css,
        "h3 {{ font-size: {}px; margin-bottom: {}px; }}",
        px(scale.h3()),
        px(scale.h3_margin())
    );
    let _ = writeln!(
        css,
        "p {{ margin-bottom: {}px; font-size: {}px; }}",
        px(scale.block_margin()),
        px(base)
    );
    let _ = writeln!(
        css,
        "ul, ol {{ margin-bottom: {}px; padding-left: {}px; }}",
        px(scale.block_margin()),
        px(scale.list_indent())
    );
    let _ = writeln!(
        css,
        "li {{ margin-bottom: {}px; font-size: {}px; }}",
        px(scale.list_item_spacing()),
        px(base)
    );
    let _ = writeln!(css, "img {{ margin: {}px 0; }}", px(scale.image_margin()));
    let _ = writeln!(
        css,
        "blockquote {{ padding-left: {}px; margin: {}px 0; font-size: {}px; }}",
        px(base),
        px(scale.block_margin()),
        px(scale.blockquote())
    );
    let _ = writeln!(
        css,
        "code {{ font-family: {MONO_STACK}; font-size: {}px; }}",
        px(scale.code())
    );
    let _ = writeln!(
        css,
        "pre {{ padding: {}px; margin: {}px 0; }}",
        px(base),
        px(scale.block_margin())
    );
    let _ = writeln!(
        css,
        "pre[data-language]::before {{ top: {}px; right: {}px; font-size: {}px; font-family: {MONO_STACK}; }}",
        px(scale.h1_padding()),
        px(base),
        px(scale.code_label())
    );
    let _ = writeln!(
        css,
        "pre code {{ font-size: {}px; font-family: {MONO_STACK}; }}",
        px(scale.code())
    );
    let _ = writeln!(css, "a {{ font-size: {}px; }}", px(base));
    let _ = writeln!(css, "table, hr {{ margin: {}px 0; }}", px(scale.block_margin()));
    let _ = writeln!(
        css,
        "th, td {{ padding: {}px; font-size: {}px; }}",
        px(scale.table_padding()),
        px(base)
    );

    css.push_str(highlight_css);
    css
}

/// Wrap a markup fragment into a complete HTML document.
///
/// `asset_base`, when given, becomes the document's `<base href>` so that
/// root-relative image paths resolve against the interceptable asset origin.
pub fn page_document(markup: &str, css: &str, asset_base: Option<&str>) -> String {
    let base = asset_base
        .map(|href| format!("<base href=\"{}\">", ammonia::clean_text(href)))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{base}\n<style>\n{css}\n</style>\n</head>\n<body>\n<div class=\"content\">\n{markup}\n</div>\n</body>\n</html>\n"
    )
}

/// Format a pixel value without a trailing `.0` for whole numbers.
fn px(value: f32) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css_for(base: u32) -> String {
        stylesheet(&TypeScale::new(base), &CanvasGeometry::default(), "")
    }

    #[test]
    fn canvas_is_pinned() {
        let css = css_for(48);
        assert!(css.contains("width: 1080px; height: 1440px;"));
        assert!(css.contains("overflow: hidden"));
        assert!(css.contains("overflow-y: auto"));
    }

    #[test]
    fn sizes_follow_scale() {
        let css = css_for(60);
        assert!(css.contains("h1 { font-size: 132px; margin-bottom: 72px; padding-bottom: 30px; }"));
        assert!(css.contains("h1::after { width: 120px; }"));
        assert!(css.contains("h2 { font-size: 90px; margin-bottom: 42px; }"));
        assert!(css.contains("li { margin-bottom: 48px; font-size: 60px; }"));
        assert!(css.contains("blockquote { padding-left: 60px; margin: 72px 0; font-size: 57px; }"));
        assert!(css.contains("th, td { padding: 48px; font-size: 60px; }"));
    }

    #[test]
    fn fractional_sizes_are_kept() {
        let css = css_for(42);
        assert!(css.contains("h1 { font-size: 92.4px;"), "got: {css}");
    }

    #[test]
    fn highlight_css_is_appended() {
        let css = stylesheet(&TypeScale::new(42), &CanvasGeometry::default(), ".syntax-x { color: red; }");
        assert!(css.trim_end().ends_with(".syntax-x { color: red; }"));
    }

    #[test]
    fn document_wraps_markup() {
        let doc = page_document("<p>hi</p>", "p{}", Some("http://assets.local/"));
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("<div class=\"content\">\n<p>hi</p>\n</div>"));
        assert!(doc.contains("<base href="));
        assert!(!page_document("x", "", None).contains("<base"));
    }

    #[test]
    fn px_formatting() {
        assert_eq!(px(72.0), "72");
        assert_eq!(px(39.9), "39.9");
    }
}
