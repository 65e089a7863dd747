//! Page splitting: one markdown document → ordered page texts.

use crate::config::PageDelimiter;

/// Split `document` into page texts.
///
/// A page break is any line that [`PageDelimiter::matches`]. Each segment is
/// trimmed and empty segments are dropped, so consecutive or trailing
/// delimiters never produce blank pages. Order is preserved.
pub fn split_pages(document: &str, delimiter: &PageDelimiter) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();

    for line in document.lines() {
        if delimiter.matches(line) {
            push_segment(&mut pages, &current);
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_segment(&mut pages, &current);
    pages
}

/// Rejoin pages with the delimiter line between them.
///
/// `split_pages(&join_pages(&p, d), d) == p` for any pages produced by
/// [`split_pages`] with the same delimiter.
pub fn join_pages(pages: &[String], delimiter: &PageDelimiter) -> String {
    pages.join(&format!("\n{}\n", delimiter.as_line()))
}

fn push_segment(pages: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        pages.push(trimmed.to_string());
    }
}
