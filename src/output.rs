//! Output types: the result of rendering one document.
//!
//! A [`GenerationBatch`] holds one [`PageResult`] per rendered page, always in
//! document order, plus the `(completed, total)` counters and an overall
//! [`BatchStatus`].

use crate::error::{CarouselError, PageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Lifecycle of one page inside a batch.
///
/// `Pending` and `Rendering` are only observed through
/// [`crate::progress::RenderProgressCallback::on_page_status`]; a finished
/// [`PageResult`] is always `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Pending,
    Rendering,
    Done,
    Failed,
}

/// The outcome of rendering a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,

    /// Markdown of this page as written, before placeholder substitution.
    pub source_text: String,

    /// The HTML fragment handed to the engine.
    #[serde(skip)]
    pub markup: String,

    /// Base font size in px chosen for this page.
    pub font_size: u32,

    pub status: PageStatus,

    /// PNG bytes, exactly 1080×1440. `None` when the page failed.
    #[serde(skip)]
    pub png: Option<Vec<u8>>,

    /// Wall-clock time for the render job.
    pub duration_ms: u64,

    /// Error, if this page failed.
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn is_done(&self) -> bool {
        self.status == PageStatus::Done && self.png.is_some()
    }

    /// The PNG as a `data:image/png;base64,...` URL.
    pub fn data_url(&self) -> Option<String> {
        self.png.as_deref().map(png_data_url)
    }
}

/// Wrap PNG bytes in a data URL.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Overall state of a batch once rendering has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Every page rendered.
    Complete,
    /// Some pages rendered, some failed (partial policy only).
    Partial,
    /// Nothing usable was produced.
    Failed,
}

/// Timing and count statistics for a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Pages the document split into.
    pub total_pages: usize,
    /// Pages selected for rendering.
    pub selected_pages: usize,
    pub rendered_pages: usize,
    pub failed_pages: usize,
    /// Time spent splitting, substituting and transcoding.
    pub prepare_duration_ms: u64,
    /// Time spent in the engine, end to end.
    pub render_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Every page result of one document, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationBatch {
    pub pages: Vec<PageResult>,
    pub completed: usize,
    pub total: usize,
    pub status: BatchStatus,
    pub stats: BatchStats,
}

impl GenerationBatch {
    /// Assemble a batch, sorting `pages` by page number.
    pub fn from_pages(mut pages: Vec<PageResult>, stats: BatchStats) -> Self {
        pages.sort_by_key(|p| p.page_num);
        let total = pages.len();
        let completed = pages.iter().filter(|p| p.is_done()).count();
        let status = if total > 0 && completed == total {
            BatchStatus::Complete
        } else if completed > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Failed
        };
        Self {
            pages,
            completed,
            total,
            status,
            stats,
        }
    }

    /// PNG bytes of the rendered pages, in document order.
    pub fn images(&self) -> Vec<&[u8]> {
        self.pages.iter().filter_map(|p| p.png.as_deref()).collect()
    }

    /// Consume the batch, keeping only the PNG bytes.
    pub fn into_images(self) -> Vec<Vec<u8>> {
        self.pages.into_iter().filter_map(|p| p.png).collect()
    }

    /// 1-based numbers of the pages that failed. Feed them to
    /// [`crate::config::PageSelection::Set`] to retry only those pages.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .map(|p| p.page_num)
            .collect()
    }

    /// `Ok(self)` only when every page rendered.
    pub fn into_result(self) -> Result<Self, CarouselError> {
        match self.status {
            BatchStatus::Complete => Ok(self),
            _ => Err(CarouselError::PartialFailure {
                success: self.completed,
                failed: self.total - self.completed,
                total: self.total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done(page_num: usize) -> PageResult {
        PageResult {
            page_num,
            source_text: format!("page {page_num}"),
            markup: String::new(),
            font_size: 72,
            status: PageStatus::Done,
            png: Some(vec![page_num as u8]),
            duration_ms: 1,
            error: None,
        }
    }

    fn failed(page_num: usize) -> PageResult {
        PageResult {
            status: PageStatus::Failed,
            png: None,
            error: Some(PageError::Timeout {
                page: page_num,
                secs: 1,
            }),
            ..done(page_num)
        }
    }

    #[test]
    fn batch_sorts_pages_and_counts() {
        let batch = GenerationBatch::from_pages(vec![done(3), done(1), done(2)], BatchStats::default());
        let order: Vec<_> = batch.pages.iter().map(|p| p.page_num).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(batch.completed, 3);
        assert_eq!(batch.status, BatchStatus::Complete);
        assert_eq!(batch.images(), vec![&[1u8][..], &[2u8][..], &[3u8][..]]);
    }

    #[test]
    fn partial_batch_reports_failed_pages() {
        let batch = GenerationBatch::from_pages(vec![done(1), failed(2), done(3)], BatchStats::default());
        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(batch.failed_pages(), vec![2]);
        let err = batch.into_result().unwrap_err();
        assert!(matches!(err, CarouselError::PartialFailure { failed: 1, .. }));
    }

    #[test]
    fn empty_batch_is_failed() {
        let batch = GenerationBatch::from_pages(vec![], BatchStats::default());
        assert_eq!(batch.status, BatchStatus::Failed);
    }

    #[test]
    fn data_url_prefix() {
        let url = done(1).data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(failed(1).data_url().is_none());
    }

    #[test]
    fn status_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&PageStatus::Done).unwrap(), "\"done\"");
        assert_eq!(serde_json::to_string(&BatchStatus::Partial).unwrap(), "\"partial\"");
    }
}
