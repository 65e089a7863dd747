//! Progress-callback trait for per-page render events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to receive
//! events as the orchestrator renders each page.
//!
//! Callers can forward events to a channel, a WebSocket or a terminal
//! progress bar without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because pages render
//! concurrently.
//!
//! # Example
//!
//! ```rust
//! use md_carousel::{BatchProgress, RenderConfig, RenderProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct Percent(AtomicU8);
//!
//! impl RenderProgressCallback for Percent {
//!     fn on_progress(&self, progress: BatchProgress) {
//!         self.0.store(progress.percent(), Ordering::SeqCst);
//!     }
//! }
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(Arc::new(Percent(AtomicU8::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Called by the orchestrator as it renders each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_page_start`, `on_page_complete`, `on_page_error`
/// and `on_progress` may be called concurrently from different tasks.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once before any page is rendered.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that will be rendered
    fn on_batch_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is handed to the engine.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been captured.
    ///
    /// # Arguments
    /// * `page_num`  — 1-indexed page number
    /// * `png_len`   — byte length of the PNG
    fn on_page_complete(&self, page_num: usize, total_pages: usize, png_len: usize) {
        let _ = (page_num, total_pages, png_len);
    }

    /// Called when a page fails.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called on every lifecycle change of a page: `Pending` for each page
    /// at batch start, then `Rendering`, then `Done` or `Failed`.
    fn on_page_status(&self, page_num: usize, status: PageStatus) {
        let _ = (page_num, status);
    }

    /// Called after every finished page (success or failure) with the
    /// batch-wide counter. `completed` never decreases within one batch.
    fn on_progress(&self, progress: BatchProgress) {
        let _ = progress;
    }

    /// Called once after rendering stops.
    ///
    /// # Arguments
    /// * `success_count` — pages that rendered without error
    fn on_batch_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

/// Snapshot of the `(completed, total)` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    /// Whole-number percentage, `completed * 100 / total`. An empty batch is 100%.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.completed.min(self.total) * 100 / self.total) as u8
    }
}

/// Owns the batch's finished-page counter and fans events out to the
/// configured callback.
pub(crate) struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub(crate) fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            callback,
        }
    }

    /// Announce the batch and mark each of `page_nums` pending.
    pub(crate) fn batch_start(&self, page_nums: impl IntoIterator<Item = usize>) {
        if let Some(cb) = &self.callback {
            cb.on_batch_start(self.total);
            for page_num in page_nums {
                cb.on_page_status(page_num, PageStatus::Pending);
            }
        }
    }

    pub(crate) fn page_start(&self, page_num: usize) {
        if let Some(cb) = &self.callback {
            cb.on_page_start(page_num, self.total);
            cb.on_page_status(page_num, PageStatus::Rendering);
        }
    }

    pub(crate) fn page_complete(&self, page_num: usize, png_len: usize) -> BatchProgress {
        if let Some(cb) = &self.callback {
            cb.on_page_complete(page_num, self.total, png_len);
            cb.on_page_status(page_num, PageStatus::Done);
        }
        self.advance()
    }

    pub(crate) fn page_error(&self, page_num: usize, error: &str) -> BatchProgress {
        if let Some(cb) = &self.callback {
            cb.on_page_error(page_num, self.total, error);
            cb.on_page_status(page_num, PageStatus::Failed);
        }
        self.advance()
    }

    pub(crate) fn batch_complete(&self, success_count: usize) {
        if let Some(cb) = &self.callback {
            cb.on_batch_complete(self.total, success_count);
        }
    }

    fn advance(&self) -> BatchProgress {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = BatchProgress {
            completed,
            total: self.total,
        };
        if let Some(cb) = &self.callback {
            cb.on_progress(progress);
        }
        progress
    }
}
