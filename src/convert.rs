//! Eager (whole-document) conversion entry points.
//!
//! [`convert`] waits for every page and returns a [`GenerationBatch`] in
//! document order. Use [`crate::stream::convert_stream`] to receive pages as
//! they finish instead.

use crate::config::{FailurePolicy, RenderConfig};
use crate::error::{CarouselError, PageError};
use crate::output::{BatchStats, GenerationBatch, PageResult, PageStatus};
use crate::pipeline::placeholder::PlaceholderMap;
use crate::pipeline::render::{render_page, RenderContext};
use crate::pipeline::split::split_pages;
use crate::pipeline::transcode::MarkdownTranscoder;
use crate::pipeline::{prepare_pages, PreparedPage};
use crate::progress::ProgressTracker;
use futures::stream::{self, Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Render a markdown document into one 1080×1440 PNG per page.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `markdown`     — the document; pages are separated by `config.delimiter`
/// * `placeholders` — image keys to substitute before rendering
/// * `config`       — render configuration
///
/// # Returns
/// `Ok(GenerationBatch)` with pages in document order. Under
/// [`FailurePolicy::Partial`] the batch may contain failed pages
/// (see [`GenerationBatch::failed_pages`]).
///
/// # Errors
/// - empty document → [`CarouselError::Validation`] (no engine is started)
/// - a generated placeholder with no image → [`CarouselError::UnresolvedPlaceholder`]
/// - fail-fast and any page fails → [`CarouselError::BatchFailed`]
/// - partial and every page fails → [`CarouselError::AllPagesFailed`]
/// - the browser cannot be launched → [`CarouselError::EngineUnavailable`]
pub async fn convert(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<GenerationBatch, CarouselError> {
    let total_start = Instant::now();

    // ── Step 1-3: Validate, split, substitute, transcode ─────────────────
    let prepared = prepare(markdown, placeholders, config).await?;
    let selected = prepared.pages.len();
    info!(
        "Rendering {}/{} pages (concurrency {}, {:?})",
        selected, prepared.total_pages, config.concurrency, config.failure_policy
    );

    // ── Step 4: Render concurrently ──────────────────────────────────────
    let ctx = RenderContext::from_config(config);
    let tracker = Arc::new(ProgressTracker::new(
        selected,
        config.progress_callback.clone(),
    ));
    tracker.batch_start(prepared.pages.iter().map(PreparedPage::page_num));

    let render_start = Instant::now();
    let mut jobs = render_jobs(prepared.pages, ctx, Arc::clone(&tracker), config.concurrency);
    let mut results: Vec<PageResult> = Vec::with_capacity(selected);

    while let Some(result) = jobs.next().await {
        if config.failure_policy == FailurePolicy::FailFast {
            if let Some(error) = result.error.clone() {
                // Dropping the stream cancels every in-flight render; their
                // tab leases clean up on drop.
                drop(jobs);
                let completed = results.iter().filter(|p| p.is_done()).count();
                tracker.batch_complete(completed);
                warn!("Aborting batch: {error}");
                return Err(batch_failed(error, completed, selected));
            }
        }
        results.push(result);
    }
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 5: Order and aggregate ──────────────────────────────────────
    let rendered = results.iter().filter(|p| p.is_done()).count();
    let stats = BatchStats {
        total_pages: prepared.total_pages,
        selected_pages: selected,
        rendered_pages: rendered,
        failed_pages: selected - rendered,
        prepare_duration_ms: prepared.duration_ms,
        render_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    let batch = GenerationBatch::from_pages(results, stats);
    tracker.batch_complete(rendered);

    if rendered == 0 {
        if let Some(detail) = engine_launch_failure(&batch.pages) {
            return Err(CarouselError::EngineUnavailable(detail));
        }
        let first_error = batch
            .pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(CarouselError::AllPagesFailed {
            total: selected,
            first_error,
        });
    }

    info!(
        "Batch complete: {}/{} pages, {}ms total",
        rendered, selected, batch.stats.total_duration_ms
    );
    Ok(batch)
}

/// Render the whole of `markdown` as a single page, without splitting.
///
/// This is what the `/convert` endpoint does: callers that split documents
/// themselves send one page at a time.
pub async fn convert_single(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<Vec<u8>, CarouselError> {
    if markdown.trim().is_empty() {
        return Err(CarouselError::Validation {
            field: "Markdown content",
        });
    }
    let transcoder = transcoder_for(config);
    let placeholders = placeholders.clone();
    let source = markdown.to_string();
    let page = tokio::task::spawn_blocking(move || {
        prepare_pages([(0, source)], &placeholders, &transcoder)
    })
    .await
    .map_err(|e| CarouselError::Internal(format!("Prepare task panicked: {}", e)))??
    .pop()
    .ok_or_else(|| CarouselError::Internal("no page prepared".into()))?;

    let ctx = RenderContext::from_config(config);
    render_page(&ctx, &page)
        .await
        .map_err(|error| batch_failed(error, 0, 1))
}

/// Render a document and write `page-<n>.png` files into `out_dir`.
///
/// Each file is written atomically (temp file + rename) so a reader never
/// sees a half-written page. Failed pages (partial policy) are skipped.
pub async fn convert_to_dir(
    markdown: &str,
    placeholders: &PlaceholderMap,
    out_dir: impl AsRef<Path>,
    config: &RenderConfig,
) -> Result<(GenerationBatch, Vec<PathBuf>), CarouselError> {
    let batch = convert(markdown, placeholders, config).await?;
    let dir = out_dir.as_ref();

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CarouselError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let mut written = Vec::with_capacity(batch.completed);
    for page in &batch.pages {
        let Some(png) = page.png.as_deref() else {
            continue;
        };
        let path = dir.join(crate::archive::page_file_name(page.page_num));
        write_atomic(&path, png).await?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }

    Ok((batch, written))
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<GenerationBatch, CarouselError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CarouselError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(markdown, placeholders, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Pages ready for the engine.
pub(crate) struct PreparedBatch {
    pub(crate) pages: Vec<PreparedPage>,
    pub(crate) total_pages: usize,
    pub(crate) duration_ms: u64,
}

/// Validate, split, select and transcode. No engine is touched here, so an
/// invalid request never launches a browser.
pub(crate) async fn prepare(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<PreparedBatch, CarouselError> {
    let start = Instant::now();

    if markdown.trim().is_empty() {
        return Err(CarouselError::Validation {
            field: "Markdown content",
        });
    }

    let pages = split_pages(markdown, &config.delimiter);
    let total_pages = pages.len();
    if total_pages == 0 {
        return Err(CarouselError::Validation {
            field: "Page content",
        });
    }

    let indices = config.pages.to_indices(total_pages);
    if indices.is_empty() {
        return Err(CarouselError::PageOutOfRange {
            page: 0,
            total: total_pages,
        });
    }
    debug!("Selected {} of {} pages", indices.len(), total_pages);

    let selected: Vec<(usize, String)> = pages
        .into_iter()
        .enumerate()
        .filter(|(i, _)| indices.binary_search(i).is_ok())
        .collect();

    // Highlighting is CPU-bound; keep it off the async workers.
    let transcoder = transcoder_for(config);
    let placeholders = placeholders.clone();
    let prepared = tokio::task::spawn_blocking(move || {
        prepare_pages(selected, &placeholders, &transcoder)
    })
    .await
    .map_err(|e| CarouselError::Internal(format!("Prepare task panicked: {}", e)))??;

    Ok(PreparedBatch {
        pages: prepared,
        total_pages,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Render every page with at most `concurrency` in flight, yielding results
/// in completion order.
pub(crate) fn render_jobs(
    pages: Vec<PreparedPage>,
    ctx: RenderContext,
    tracker: Arc<ProgressTracker>,
    concurrency: usize,
) -> impl Stream<Item = PageResult> + Send + 'static {
    stream::iter(pages.into_iter().map(move |page| {
        render_job(ctx.clone(), Arc::clone(&tracker), page)
    }))
    .buffer_unordered(concurrency.max(1))
}

async fn render_job(
    ctx: RenderContext,
    tracker: Arc<ProgressTracker>,
    page: PreparedPage,
) -> PageResult {
    let page_num = page.page_num();
    tracker.page_start(page_num);
    let started = Instant::now();

    let outcome = render_page(&ctx, &page).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (status, png, error) = match outcome {
        Ok(png) => {
            let progress = tracker.page_complete(page_num, png.len());
            debug!(
                "Page {} done in {}ms ({}%)",
                page_num,
                duration_ms,
                progress.percent()
            );
            (PageStatus::Done, Some(png), None)
        }
        Err(e) => {
            warn!("{e}");
            tracker.page_error(page_num, &e.to_string());
            (PageStatus::Failed, None, Some(e))
        }
    };

    PageResult {
        page_num,
        font_size: page.font_size(),
        source_text: page.source_text,
        markup: page.markup,
        status,
        png,
        duration_ms,
        error,
    }
}

fn transcoder_for(config: &RenderConfig) -> Arc<MarkdownTranscoder> {
    match &config.transcoder {
        Some(t) => Arc::clone(t),
        None => Arc::new(MarkdownTranscoder::new()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CarouselError> {
    let tmp_path = path.with_extension("png.tmp");
    let fail = |e| CarouselError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)
}

/// The fatal error for an aborted batch. A browser that never started is
/// not a page problem, so it is reported as the engine being unavailable.
fn batch_failed(error: PageError, completed: usize, total: usize) -> CarouselError {
    match error {
        PageError::EngineLaunch { detail, .. } => CarouselError::EngineUnavailable(detail),
        source => CarouselError::BatchFailed {
            completed,
            total,
            source,
        },
    }
}

/// The launch error when every page failed because the engine never started.
fn engine_launch_failure(pages: &[PageResult]) -> Option<String> {
    let mut detail = None;
    for page in pages {
        match &page.error {
            Some(PageError::EngineLaunch { detail: d, .. }) => {
                detail.get_or_insert_with(|| d.clone());
            }
            _ => return None,
        }
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSelection;

    #[tokio::test]
    async fn empty_markdown_is_rejected_before_rendering() {
        let config = RenderConfig::default();
        let err = convert("   \n", &PlaceholderMap::new(), &config).await.unwrap_err();
        assert!(matches!(err, CarouselError::Validation { .. }));
        assert_eq!(err.to_string(), "Markdown content is required");
    }

    #[tokio::test]
    async fn delimiter_only_document_is_rejected() {
        let err = convert("---\n---\n", &PlaceholderMap::new(), &RenderConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn out_of_range_selection_is_rejected() {
        let config = RenderConfig::builder()
            .pages(PageSelection::Single(5))
            .build()
            .unwrap();
        let err = prepare("# a\n---\n# b", &PlaceholderMap::new(), &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CarouselError::PageOutOfRange { total: 2, .. }));
    }

    #[tokio::test]
    async fn selection_keeps_document_numbering() {
        let config = RenderConfig::builder()
            .pages(PageSelection::Set(vec![3, 1]))
            .build()
            .unwrap();
        let prepared = prepare("a\n---\nb\n---\nc", &PlaceholderMap::new(), &config)
            .await
            .ok()
            .unwrap();
        let nums: Vec<_> = prepared.pages.iter().map(|p| p.page_num()).collect();
        assert_eq!(nums, vec![1, 3]);
        assert_eq!(prepared.total_pages, 3);
    }

    #[test]
    fn launch_failure_is_engine_unavailable() {
        let err = batch_failed(
            PageError::EngineLaunch {
                page: 2,
                detail: "no chrome".into(),
            },
            1,
            3,
        );
        assert!(matches!(err, CarouselError::EngineUnavailable(ref d) if d == "no chrome"));
        assert!(!err.is_client_error());

        let err = batch_failed(PageError::Timeout { page: 2, secs: 5 }, 1, 3);
        assert!(matches!(err, CarouselError::BatchFailed { completed: 1, total: 3, .. }));
    }

    #[test]
    fn launch_failure_needs_every_page() {
        let failed = |error: PageError| PageResult {
            page_num: error.page(),
            source_text: String::new(),
            markup: String::new(),
            font_size: 72,
            status: PageStatus::Failed,
            png: None,
            duration_ms: 0,
            error: Some(error),
        };
        let launch = |page| {
            failed(PageError::EngineLaunch {
                page,
                detail: "no chrome".into(),
            })
        };

        assert_eq!(
            engine_launch_failure(&[launch(1), launch(2)]).as_deref(),
            Some("no chrome")
        );
        assert_eq!(
            engine_launch_failure(&[launch(1), failed(PageError::Timeout { page: 2, secs: 5 })]),
            None
        );
    }
}
