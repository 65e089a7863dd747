//! Streaming conversion API: emit pages as they finish.
//!
//! Unlike the eager [`crate::convert::convert`], which returns only after
//! every page is rendered, [`convert_stream`] yields each [`PageResult`] as
//! soon as its render job completes. Pages arrive in completion order; sort
//! by `page_num` if order matters.
//!
//! The failure policy does not apply here: every page yields either
//! `Ok(PageResult)` or `Err(PageError)` and the caller decides whether to
//! keep polling. Dropping the stream cancels the remaining pages.

use crate::config::RenderConfig;
use crate::convert::{prepare, render_jobs};
use crate::error::{CarouselError, PageError};
use crate::output::PageResult;
use crate::pipeline::placeholder::PlaceholderMap;
use crate::pipeline::render::RenderContext;
use crate::progress::ProgressTracker;
use futures::stream::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageResult, PageError>> + Send>>;

/// Render a markdown document, streaming pages as they are ready.
///
/// Validation, splitting and transcoding happen before this returns, so an
/// empty document or an unresolved placeholder is reported as `Err` here
/// and no engine is started.
///
/// # Example
/// ```rust,no_run
/// use md_carousel::{convert_stream, PlaceholderMap, RenderConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RenderConfig::default();
/// let mut pages = convert_stream("# One\n---\n# Two", &PlaceholderMap::new(), &config).await?;
/// while let Some(page) = pages.next().await {
///     match page {
///         Ok(p) => println!("page {}: {} bytes", p.page_num, p.png.map_or(0, |b| b.len())),
///         Err(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<PageStream, CarouselError> {
    let prepared = prepare(markdown, placeholders, config).await?;
    let total = prepared.pages.len();
    info!(
        "Streaming {}/{} pages (concurrency {})",
        total, prepared.total_pages, config.concurrency
    );

    let ctx = RenderContext::from_config(config);
    let tracker = Arc::new(ProgressTracker::new(total, config.progress_callback.clone()));
    tracker.batch_start(prepared.pages.iter().map(|p| p.page_num()));

    let s = render_jobs(prepared.pages, ctx, tracker, config.concurrency).map(|mut page| {
        match page.error.take() {
            Some(e) => Err(e),
            None => Ok(page),
        }
    });

    Ok(Box::pin(s))
}
