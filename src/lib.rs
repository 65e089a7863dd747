//! # md-carousel
//!
//! Render a markdown document into a carousel of fixed-size 1080×1440 PNG
//! pages, ready to post as a social-media image set.
//!
//! Authors write one document and separate pages with a horizontal rule
//! (`---`). Each page gets its own font size from how much text it holds,
//! is laid out by headless Chromium with a stylesheet scaled to that size,
//! and is captured at exactly the canvas bounds.
//!
//! ## Pipeline Overview
//!
//! ```text
//! markdown
//!  │
//!  ├─ 1. Split       cut on delimiter lines, drop empty pages
//!  ├─ 2. Substitute  image placeholder keys → uploaded image URLs
//!  ├─ 3. Scale       base font size from visible character count
//!  ├─ 4. Transcode   markdown → HTML, code highlighted by syntect
//!  ├─ 5. Render      headless Chromium, bounded concurrency, per-page timeout
//!  └─ 6. Output      1080×1440 PNGs in document order (+ optional zip)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md_carousel::{convert, PlaceholderMap, RenderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RenderConfig::default();
//!     let doc = "# Hello (World)\n\nbody text\n---\n# Page2";
//!     let batch = convert(doc, &PlaceholderMap::new(), &config).await?;
//!     for page in &batch.pages {
//!         println!("page {}: {}px base font", page.page_num, page.font_size);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `carousel` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | HTTP endpoints on axum (`carousel serve`) |
//!
//! Disable both when using only the library:
//! ```toml
//! md-carousel = { version = "0.1", default-features = false }
//! ```
//!
//! ## Rendering engine
//!
//! The built-in engine drives a Chrome/Chromium executable found through
//! `CHROME_PATH`, the usual install locations, or `PATH`. Anything that
//! implements [`RenderEngine`] can replace it via
//! [`RenderConfigBuilder::engine`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod stream;
pub mod uploads;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{archive_images, build_archive, convert_to_archive, page_file_name, ARCHIVE_NAME};
pub use config::{
    ChromiumOptions, FailurePolicy, PageDelimiter, PageSelection, RenderConfig,
    RenderConfigBuilder,
};
pub use convert::{convert, convert_single, convert_sync, convert_to_dir};
pub use engine::chromium::ChromiumPool;
pub use engine::{CaptureRequest, EngineError, RenderEngine};
pub use error::{AssetError, CarouselError, PageError, UploadError};
pub use generate::{ContentGenerator, TemplateGenerator};
pub use output::{BatchStats, BatchStatus, GenerationBatch, PageResult, PageStatus};
pub use pipeline::assets::{Asset, AssetResolution, AssetResolver, LocalAssetResolver};
pub use pipeline::placeholder::PlaceholderMap;
pub use pipeline::transcode::MarkdownTranscoder;
pub use pipeline::{CanvasGeometry, CANVAS_HEIGHT, CANVAS_WIDTH};
pub use progress::{BatchProgress, NoopProgressCallback, RenderProgressCallback};
pub use stream::{convert_stream, PageStream};
pub use uploads::{StoredImage, UploadStore, MAX_UPLOAD_BYTES};
