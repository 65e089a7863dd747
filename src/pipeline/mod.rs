//! Pipeline stages for markdown-to-carousel rendering.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! is testable on its own and the engine can be swapped without touching
//! the text stages.
//!
//! ## Data Flow
//!
//! ```text
//! split ──▶ placeholder ──▶ typography ──▶ transcode ──▶ style ──▶ render ──▶ encode
//! (pages)   (substitute)    (font size)    (HTML)        (CSS)     (engine)   (1080×1440 PNG)
//!                                                                      ▲
//!                                                              assets ─┘ (interception)
//! ```
//!
//! 1. [`split`]       — cut the document into trimmed, non-empty pages
//! 2. [`placeholder`] — replace generated image keys with uploaded images
//! 3. [`typography`]  — pick the base font size from content density
//! 4. [`transcode`]   — markdown → HTML, code highlighted by [`highlight`]
//! 5. [`style`]       — scaled stylesheet and the full page document
//! 6. [`render`]      — drive the engine with a timeout, one job per page
//! 7. [`encode`]      — validate the capture and force the canvas size
//!
//! [`assets`] supplies image bytes to the engine while a page loads.

pub mod assets;
pub mod encode;
pub mod highlight;
pub mod placeholder;
pub mod render;
pub mod split;
pub mod style;
pub mod transcode;
pub mod typography;

use serde::{Deserialize, Serialize};

use self::placeholder::PlaceholderMap;
use self::transcode::MarkdownTranscoder;
use self::typography::TypeScale;
use crate::error::CarouselError;

/// Output canvas width in px.
pub const CANVAS_WIDTH: u32 = 1080;
/// Output canvas height in px.
pub const CANVAS_HEIGHT: u32 = 1440;

/// Viewport and capture geometry. Always 1080×1440 at device scale 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasGeometry {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Default for CanvasGeometry {
    fn default() -> Self {
        CANVAS
    }
}

pub const CANVAS: CanvasGeometry = CanvasGeometry {
    width: CANVAS_WIDTH,
    height: CANVAS_HEIGHT,
    device_scale_factor: 1.0,
};

/// A page with everything the engine needs, before rendering.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    /// 0-based position in the document.
    pub index: usize,
    /// Page text as split from the document.
    pub source_text: String,
    /// Page text after placeholder substitution.
    pub resolved_text: String,
    /// HTML fragment for the `.content` column.
    pub markup: String,
    pub scale: TypeScale,
}

impl PreparedPage {
    /// 1-based page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn font_size(&self) -> u32 {
        self.scale.base as u32
    }
}

/// Substitute placeholders, size and transcode every `(index, text)` page.
///
/// Font size is computed from the substituted text, matching what the
/// engine will lay out.
pub fn prepare_pages(
    pages: impl IntoIterator<Item = (usize, String)>,
    placeholders: &PlaceholderMap,
    transcoder: &MarkdownTranscoder,
) -> Result<Vec<PreparedPage>, CarouselError> {
    pages
        .into_iter()
        .map(|(index, source_text)| {
            let resolved_text = placeholders.substitute(&source_text);
            if let Some(key) = placeholder::find_unresolved(&resolved_text) {
                return Err(CarouselError::UnresolvedPlaceholder {
                    page: index + 1,
                    key,
                });
            }
            let scale = TypeScale::for_text(&resolved_text);
            let markup = transcoder.transcode(&resolved_text);
            Ok(PreparedPage {
                index,
                source_text,
                resolved_text,
                markup,
                scale,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_constants() {
        let c = CanvasGeometry::default();
        assert_eq!((c.width, c.height), (1080, 1440));
        assert_eq!(c.device_scale_factor, 1.0);
    }

    #[test]
    fn prepare_assigns_contiguous_indices() {
        let t = MarkdownTranscoder::new();
        let pages = vec!["# One".to_string(), "# Two".to_string(), "three".to_string()];
        let prepared =
            prepare_pages(pages.into_iter().enumerate(), &PlaceholderMap::new(), &t).unwrap();
        let idx: Vec<_> = prepared.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![0, 1, 2]);
        assert_eq!(prepared[0].page_num(), 1);
        assert!(prepared[1].markup.contains("<h1>Two</h1>"));
        assert_eq!(prepared[0].font_size(), 72);
    }

    #[test]
    fn prepare_rejects_unknown_generated_key() {
        let t = MarkdownTranscoder::new();
        let pages = vec![(0, "![pic](image-123e4567-e89b-42d3-a456-426614174000)".to_string())];
        let err = prepare_pages(pages, &PlaceholderMap::new(), &t).unwrap_err();
        assert!(matches!(err, CarouselError::UnresolvedPlaceholder { page: 1, .. }));
    }
}
