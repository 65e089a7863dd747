//! Markdown → HTML fragment.
//!
//! CommonMark with the GFM extensions, raw HTML passed through, fenced code
//! highlighted by [`super::highlight`]. A final pass decorates level-one
//! headings: the first parenthesised group of an `<h1>` becomes a
//! highlighted span.

use comrak::{
    format_html,
    nodes::{AstNode, NodeHtmlBlock, NodeValue},
    options::Options,
    parse_document, Arena,
};
use once_cell::sync::Lazy;
use regex::Regex;
use syntect::parsing::SyntaxSet;
use tracing::warn;

use super::highlight;

static H1_PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<h1>(.*?)\((.*?)\)(.*?)</h1>").expect("valid regex"));

/// Converts page markdown into the HTML fragment placed inside the canvas.
///
/// Construct once and share by reference: loading the syntax definitions is
/// the expensive part.
pub struct MarkdownTranscoder {
    options: Options<'static>,
    syntax_set: SyntaxSet,
}

impl Default for MarkdownTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownTranscoder {
    pub fn new() -> Self {
        Self {
            options: default_options(),
            syntax_set: SyntaxSet::load_defaults_newlines(),
        }
    }

    /// Transcode one page. Never fails; a formatter error yields whatever
    /// HTML was produced before it.
    pub fn transcode(&self, markdown: &str) -> String {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);
        self.highlight_code_blocks(root);

        let mut html = String::new();
        if let Err(err) = format_html(root, &self.options, &mut html) {
            warn!("HTML formatting stopped early: {err}");
        }
        decorate_headings(&html)
    }

    fn highlight_code_blocks<'a>(&self, node: &'a AstNode<'a>) {
        let code = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::CodeBlock(block) => Some((block.info.clone(), block.literal.clone())),
                _ => None,
            }
        };

        if let Some((info, literal)) = code {
            let language = info.split_whitespace().next();
            let html = highlight::highlight_code(language, &literal, &self.syntax_set);
            let mut data = node.data.borrow_mut();
            data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
                block_type: 0,
                literal: html,
            });
            return;
        }

        let mut child = node.first_child();
        while let Some(next) = child {
            self.highlight_code_blocks(next);
            child = next.next_sibling();
        }
    }
}

/// `<h1>a (b) c</h1>` → `<h1>a <span class="highlight">b</span> c</h1>`,
/// applied to every level-one heading.
pub fn decorate_headings(html: &str) -> String {
    H1_PAREN_RE
        .replace_all(html, r#"<h1>$1<span class="highlight">$2</span>$3</h1>"#)
        .into_owned()
}

fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;

    options.parse.smart = true;

    let render = &mut options.render;
    render.r#unsafe = true;
    render.github_pre_lang = true;

    options
}
