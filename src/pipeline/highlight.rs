//! Fenced-code highlighting with syntect.
//!
//! Highlighted spans carry `syntax-` prefixed classes; the matching colours
//! come from [`theme_css`], which the stylesheet embeds.

use syntect::{
    highlighting::ThemeSet,
    html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};
use tracing::warn;

pub const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "syntax-" };

/// Theme used for highlighted code on the page.
pub const DEFAULT_THEME: &str = "base16-ocean.dark";

/// Render a fenced code block.
///
/// A language syntect knows is highlighted; anything else, including no
/// language at all, is emitted as escaped plain code. Never fails.
pub fn highlight_code(language: Option<&str>, code: &str, syntax_set: &SyntaxSet) -> String {
    let language = language.map(str::trim).filter(|l| !l.is_empty());
    let Some(lang) = language else {
        return plain_code_block(None, code);
    };
    let Some(syntax) = find_syntax(syntax_set, lang) else {
        return plain_code_block(Some(lang), code);
    };

    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, CLASS_STYLE);
    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        if let Err(err) = generator.parse_html_for_line_which_includes_newline(line) {
            warn!(language = lang, "Highlighting failed, emitting plain code: {err}");
            return plain_code_block(Some(lang), code);
        }
    }
    let highlighted = generator.finalize();

    let token = lang.to_ascii_lowercase();
    format!(
        "<pre class=\"syntax-highlight syntax-lang-{token}\" data-language=\"{}\"><code class=\"language-{token} syntax-code\">{highlighted}</code></pre>\n",
        escape_attribute(lang),
    )
}

/// CSS for the `syntax-` classes of [`DEFAULT_THEME`].
pub fn theme_css() -> String {
    let themes = ThemeSet::load_defaults();
    let Some(theme) = themes.themes.get(DEFAULT_THEME) else {
        warn!("Theme '{DEFAULT_THEME}' missing from syntect defaults");
        return String::new();
    };
    match css_for_theme_with_class_style(theme, CLASS_STYLE) {
        Ok(css) => css,
        Err(err) => {
            warn!("Failed to build highlight CSS: {err}");
            String::new()
        }
    }
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

fn plain_code_block(language: Option<&str>, literal: &str) -> String {
    let escaped_code = ammonia::clean_text(literal);
    let mut html = String::from("<pre class=\"syntax-highlight\"");
    if let Some(lang) = language {
        html.push_str(" data-language=\"");
        html.push_str(&escape_attribute(lang));
        html.push('"');
    }
    html.push_str("><code>");
    html.push_str(&escaped_code);
    // `clean_text` encodes newlines as `&#10;`, so check the raw text.
    if !literal.ends_with('\n') {
        html.push('\n');
    }
    html.push_str("</code></pre>\n");
    html
}

fn escape_attribute(value: &str) -> String {
    ammonia::clean_text(value)
}
