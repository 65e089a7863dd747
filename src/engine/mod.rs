//! Rendering engines: lay out a page document and capture it as PNG.
//!
//! The orchestrator only talks to [`RenderEngine`]. The production engine
//! is [`chromium::ChromiumPool`], a process-wide headless Chromium; tests
//! plug in deterministic fakes.

pub mod chromium;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::PageError;
use crate::pipeline::assets::AssetResolver;
use crate::pipeline::CanvasGeometry;

/// Everything an engine needs to capture one page.
#[derive(Clone)]
pub struct CaptureRequest {
    /// 1-based page number, for logs and errors.
    pub page_num: usize,
    /// Complete HTML document (see [`crate::pipeline::style::page_document`]).
    pub html: String,
    pub canvas: CanvasGeometry,
    /// Answers image requests made while the document loads.
    pub resolver: Arc<dyn AssetResolver>,
}

impl std::fmt::Debug for CaptureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRequest")
            .field("page_num", &self.page_num)
            .field("html_len", &self.html.len())
            .field("canvas", &self.canvas)
            .finish()
    }
}

/// Engine failure, before it is attributed to a page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("capture timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl EngineError {
    pub fn into_page_error(self, page: usize) -> PageError {
        match self {
            EngineError::Launch(detail) => PageError::EngineLaunch { page, detail },
            EngineError::Navigation(detail) => PageError::Navigation { page, detail },
            EngineError::Capture(detail) => PageError::Capture { page, detail },
            EngineError::Timeout(limit) => PageError::Timeout {
                page,
                secs: limit.as_secs(),
            },
        }
    }
}

/// A layout engine that turns an HTML document into PNG bytes.
///
/// Implementations must be safe to call concurrently; the orchestrator
/// keeps up to `concurrency` captures in flight.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Lay out `request.html` on a `request.canvas` viewport and capture
    /// exactly the canvas rectangle as PNG.
    async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, EngineError>;

    /// [`capture`](Self::capture) bounded by `timeout`.
    ///
    /// Engines that queue captures override this so the clock starts once
    /// the capture actually begins; time spent waiting for a free slot is
    /// not charged to the page.
    async fn capture_within(
        &self,
        request: CaptureRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        tokio::time::timeout(timeout, self.capture(request))
            .await
            .unwrap_or(Err(EngineError::Timeout(timeout)))
    }

    /// Release engine-wide resources. Further captures may relaunch.
    async fn shutdown(&self) {}
}
