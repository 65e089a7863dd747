//! Error types for the md-carousel library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CarouselError`] — **Fatal**: the request cannot produce a batch
//!   (empty input, rejected upload, every page failed, fail-fast abort).
//!   Returned as `Err(CarouselError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] — **Per page**: one page's render job failed (engine
//!   launch, navigation, capture, timeout). Stored inside
//!   [`crate::output::PageResult`] when the batch runs with
//!   [`crate::config::FailurePolicy::Partial`].
//!
//! Asset resolution problems are neither: a picture that cannot be read is
//! simply missing from the page ([`AssetError`] is logged, never returned).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the md-carousel library.
#[derive(Debug, Error)]
pub enum CarouselError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A required input field is missing or empty.
    #[error("{field} is required")]
    Validation { field: &'static str },

    /// An uploaded file was rejected.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// A generated image placeholder had no entry in the placeholder map.
    #[error("Page {page}: image placeholder '{key}' has no uploaded image")]
    UnresolvedPlaceholder { page: usize, key: String },

    /// The page selection matched none of the document's pages.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// Fail-fast policy: one page failed, so the whole batch did.
    #[error("Batch failed after {completed}/{total} pages: {source}")]
    BatchFailed {
        completed: usize,
        total: usize,
        #[source]
        source: PageError,
    },

    /// Partial policy: not a single page rendered.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages rendered but at least one failed.
    ///
    /// Returned by [`crate::output::GenerationBatch::into_result`] when the
    /// caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed to render")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Engine errors ─────────────────────────────────────────────────────
    /// No rendering engine could be started.
    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Building the zip archive failed.
    #[error("Failed to build archive: {0}")]
    Archive(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CarouselError {
    /// `true` for caller mistakes (HTTP 400), `false` for server-side
    /// failures (HTTP 500).
    pub fn is_client_error(&self) -> bool {
        match self {
            CarouselError::Validation { .. }
            | CarouselError::UnresolvedPlaceholder { .. }
            | CarouselError::PageOutOfRange { .. } => true,
            CarouselError::Upload(e) => !matches!(e, UploadError::Storage(_)),
            _ => false,
        }
    }
}

/// A failed render job for a single page.
///
/// `page` is always the 1-based page number.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The browser process or its page target could not be started.
    #[error("Page {page}: rendering engine failed to start: {detail}")]
    EngineLaunch { page: usize, detail: String },

    /// Loading the markup or waiting for layout failed.
    #[error("Page {page}: layout failed: {detail}")]
    Navigation { page: usize, detail: String },

    /// The screenshot could not be taken.
    #[error("Page {page}: capture failed: {detail}")]
    Capture { page: usize, detail: String },

    /// The engine returned bytes that are not a decodable image.
    #[error("Page {page}: engine returned an invalid image: {detail}")]
    InvalidImage { page: usize, detail: String },

    /// The render job exceeded the per-page timeout.
    #[error("Page {page}: render timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl PageError {
    /// The 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::EngineLaunch { page, .. }
            | PageError::Navigation { page, .. }
            | PageError::Capture { page, .. }
            | PageError::InvalidImage { page, .. }
            | PageError::Timeout { page, .. } => *page,
        }
    }
}

/// Rejected upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("File must be an image (got '{content_type}')")]
    NotAnImage { content_type: String },

    #[error("File size must be less than {max} bytes (got {size})")]
    TooLarge { size: usize, max: usize },

    /// The request body was cut off at the transport limit, so the size is
    /// not known.
    #[error("File size must be less than {max} bytes")]
    BodyTooLarge { max: usize },

    /// The multipart body could not be read.
    #[error("Malformed upload: {0}")]
    Malformed(String),

    #[error("Failed to store upload: {0}")]
    Storage(#[source] std::io::Error),
}

/// Why an in-document image could not be supplied to the renderer.
///
/// Never fatal: the image is left out of the rendered page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("malformed data URI: {0}")]
    MalformedDataUri(String),

    #[error("asset '{path}' not found")]
    NotFound { path: String },

    #[error("asset path '{path}' escapes the storage root")]
    OutsideRoot { path: String },

    #[error("failed to read asset '{path}': {detail}")]
    Read { path: String, detail: String },
}
