//! Content-density typography: shorter pages get bigger type.
//!
//! The base size is a step function of how many visible characters a page
//! has once markdown syntax is stripped. Every other metric on the page is a
//! fixed multiple of that base (see [`TypeScale`]).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Markdown punctuation, bracketed link text and parenthesised targets.
static MARKUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#*_`~>]|\[.*?\]|\(.*?\)").expect("valid regex"));

/// `(exclusive upper bound on character count, base size in px)`.
const STEPS: &[(usize, u32)] = &[(10, 72), (30, 60), (50, 54), (100, 48)];

/// Base size once a page reaches the last threshold.
const MIN_FONT_SIZE: u32 = 42;

/// Number of characters left after stripping markdown syntax and trimming.
pub fn visible_char_count(text: &str) -> usize {
    MARKUP_RE.replace_all(text, "").trim().chars().count()
}

/// Base font size in px for a page of markdown.
///
/// Deterministic and non-increasing in [`visible_char_count`].
pub fn base_font_size(text: &str) -> u32 {
    font_size_for_count(visible_char_count(text))
}

pub fn font_size_for_count(count: usize) -> u32 {
    STEPS
        .iter()
        .find(|(limit, _)| count < *limit)
        .map(|(_, size)| *size)
        .unwrap_or(MIN_FONT_SIZE)
}

/// Every size-dependent metric of a page, derived from the base font size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TypeScale {
    pub base: f32,
}

impl TypeScale {
    pub fn new(base_px: u32) -> Self {
        Self {
            base: base_px as f32,
        }
    }

    pub fn for_text(text: &str) -> Self {
        Self::new(base_font_size(text))
    }

    fn times(&self, factor: f32) -> f32 {
        self.base * factor
    }

    pub fn h1(&self) -> f32 {
        self.times(2.2)
    }
    pub fn h1_padding(&self) -> f32 {
        self.times(0.5)
    }
    pub fn h1_underline(&self) -> f32 {
        self.times(2.0)
    }
    pub fn h2(&self) -> f32 {
        self.times(1.5)
    }
    pub fn h2_margin(&self) -> f32 {
        self.times(0.7)
    }
    pub fn h3(&self) -> f32 {
        self.times(1.3)
    }
    pub fn h3_margin(&self) -> f32 {
        self.times(0.6)
    }
    /// Paragraph and block spacing.
    pub fn block_margin(&self) -> f32 {
        self.times(1.2)
    }
    pub fn list_indent(&self) -> f32 {
        self.times(1.5)
    }
    pub fn list_item_spacing(&self) -> f32 {
        self.times(0.8)
    }
    pub fn image_margin(&self) -> f32 {
        self.times(0.8)
    }
    pub fn blockquote(&self) -> f32 {
        self.times(0.95)
    }
    pub fn code(&self) -> f32 {
        self.times(0.9)
    }
    pub fn code_label(&self) -> f32 {
        self.times(0.8)
    }
    pub fn table_padding(&self) -> f32 {
        self.times(0.8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(font_size_for_count(0), 72);
        assert_eq!(font_size_for_count(9), 72);
        assert_eq!(font_size_for_count(10), 60);
        assert_eq!(font_size_for_count(29), 60);
        assert_eq!(font_size_for_count(30), 54);
        assert_eq!(font_size_for_count(49), 54);
        assert_eq!(font_size_for_count(50), 48);
        assert_eq!(font_size_for_count(99), 48);
        assert_eq!(font_size_for_count(100), 42);
        assert_eq!(font_size_for_count(10_000), 42);
    }

    #[test]
    fn non_increasing() {
        let sizes: Vec<u32> = (0..200).map(font_size_for_count).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn strips_markdown_syntax() {
        assert_eq!(visible_char_count("# **Hi**"), 2);
        assert_eq!(visible_char_count("> `code` ~x~"), 6);
        assert_eq!(visible_char_count("see [the docs](https://x.y/z)"), 3);
    }

    #[test]
    fn deterministic_for_same_text() {
        let text = "# Title\n\nSome body text that is a little longer than ten.";
        assert_eq!(base_font_size(text), base_font_size(text));
        assert_eq!(base_font_size("# Hi"), 72);
    }

    #[test]
    fn scale_multipliers() {
        let s = TypeScale::new(60);
        assert!((s.h1() - 132.0).abs() < 1e-3);
        assert!((s.h2() - 90.0).abs() < 1e-3);
        assert!((s.h3() - 78.0).abs() < 1e-3);
        assert!((s.block_margin() - 72.0).abs() < 1e-3);
        assert!((s.list_item_spacing() - 48.0).abs() < 1e-3);
        assert!((s.h1_underline() - 120.0).abs() < 1e-3);
    }
}
