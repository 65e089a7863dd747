//! Orchestrator integration tests against a deterministic fake engine.
//!
//! The fake engine returns generated PNGs after per-page delays, so
//! completion order, failures and timeouts are fully scripted. Time is
//! paused where delays matter.

use async_trait::async_trait;
use futures::StreamExt;
use md_carousel::{
    convert, convert_single, convert_stream, convert_to_archive, convert_to_dir, AssetResolution,
    BatchProgress, BatchStatus, CaptureRequest, CarouselError, EngineError, FailurePolicy,
    PageError, PageSelection, PageStatus, PlaceholderMap, RenderConfig, RenderEngine,
    RenderProgressCallback,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fake engine ──────────────────────────────────────────────────────────

static IMG_SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<img src="([^"]+)""#).unwrap());

#[derive(Default)]
struct FakeEngine {
    delays_ms: HashMap<usize, u64>,
    failing: HashSet<usize>,
    size: Option<(u32, u32)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: Mutex<Vec<usize>>,
    html: Mutex<HashMap<usize, String>>,
    assets: Mutex<Vec<&'static str>>,
}

impl FakeEngine {
    fn new() -> Self {
        Self::default()
    }

    fn delay(mut self, page: usize, ms: u64) -> Self {
        self.delays_ms.insert(page, ms);
        self
    }

    fn fail(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    fn capture_size(mut self, w: u32, h: u32) -> Self {
        self.size = Some((w, h));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().clone()
    }

    fn html(&self, page: usize) -> String {
        self.html.lock().unwrap().get(&page).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let page = request.page_num;
        self.html.lock().unwrap().insert(page, request.html.clone());

        for cap in IMG_SRC_RE.captures_iter(&request.html) {
            let label = match request.resolver.resolve(&cap[1]).await {
                AssetResolution::Resolved(_) => "resolved",
                AssetResolution::Passthrough => "passthrough",
                AssetResolution::Failed(_) => "failed",
            };
            self.assets.lock().unwrap().push(label);
        }

        if let Some(ms) = self.delays_ms.get(&page) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&page) {
            return Err(EngineError::Capture(format!("scripted failure on page {page}")));
        }
        self.finished.lock().unwrap().push(page);
        let (w, h) = self.size.unwrap_or((1080, 1440));
        Ok(png(w, h))
    }
}

fn png(w: u32, h: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        w,
        h,
        image::Rgba([250, 250, 250, 255]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn dims(bytes: &[u8]) -> (u32, u32) {
    use image::GenericImageView;
    image::load_from_memory(bytes).unwrap().dimensions()
}

fn config(engine: &Arc<FakeEngine>) -> md_carousel::RenderConfigBuilder {
    RenderConfig::builder().engine(engine.clone() as Arc<dyn RenderEngine>)
}

const THREE_PAGES: &str = "# One\n---\n# Two\n---\n# Three";

// ── Happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_document_renders_two_canvas_pngs() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let doc = "# Hello (World)\n\nbody text\n---\n# Page2";
    let batch = convert(doc, &PlaceholderMap::new(), &cfg).await.unwrap();

    assert_eq!(batch.status, BatchStatus::Complete);
    assert_eq!((batch.completed, batch.total), (2, 2));
    for png in batch.images() {
        assert_eq!(dims(png), (1080, 1440));
    }

    let first = &batch.pages[0];
    assert!(
        first
            .markup
            .contains(r#"<h1>Hello <span class="highlight">World</span></h1>"#),
        "got: {}",
        first.markup
    );
    assert_eq!(first.source_text, "# Hello (World)\n\nbody text");
    assert_eq!(first.font_size, 60);
    assert_eq!(batch.pages[1].font_size, 72);
    assert!(engine.html(1).contains("font-size: 60px"));
}

#[tokio::test(start_paused = true)]
async fn results_follow_document_order_not_completion_order() {
    let engine = Arc::new(FakeEngine::new().delay(1, 300).delay(2, 200).delay(3, 0));
    let cfg = config(&engine).concurrency(3).build().unwrap();

    let batch = convert(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();

    assert_eq!(engine.finished(), vec![3, 2, 1]);
    let order: Vec<_> = batch.pages.iter().map(|p| p.page_num).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert!(batch.pages[2].markup.contains("Three"));
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded() {
    let mut engine = FakeEngine::new();
    for page in 1..=6 {
        engine = engine.delay(page, 50);
    }
    let engine = Arc::new(engine);
    let cfg = config(&engine).concurrency(2).build().unwrap();

    let doc = (1..=6).map(|i| format!("page {i}")).collect::<Vec<_>>().join("\n---\n");
    let batch = convert(&doc, &PlaceholderMap::new(), &cfg).await.unwrap();

    assert_eq!(batch.completed, 6);
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn wrong_size_captures_are_normalised() {
    let engine = Arc::new(FakeEngine::new().capture_size(540, 720));
    let cfg = config(&engine).build().unwrap();

    let batch = convert("# a\n---\n# b", &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    for png in batch.images() {
        assert_eq!(dims(png), (1080, 1440));
    }
}

// ── Validation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_markdown_never_reaches_the_engine() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    for doc in ["", "   \n\t", "---\n\n---"] {
        let err = convert(doc, &PlaceholderMap::new(), &cfg).await.unwrap_err();
        assert!(err.is_client_error(), "{doc:?} gave {err}");
    }
    let err = convert_single("", &PlaceholderMap::new(), &cfg).await.unwrap_err();
    assert_eq!(err.to_string(), "Markdown content is required");
    assert!(convert_stream(" ", &PlaceholderMap::new(), &cfg).await.is_err());

    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn unresolved_placeholder_is_rejected_before_rendering() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let key = PlaceholderMap::generate_key();
    let doc = format!("# ok\n---\n![pic]({key})");
    let err = convert(&doc, &PlaceholderMap::new(), &cfg).await.unwrap_err();

    match err {
        CarouselError::UnresolvedPlaceholder { page, key: k } => {
            assert_eq!(page, 2);
            assert_eq!(k, key);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.calls(), 0);
}

// ── Failure policies ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fail_fast_aborts_and_cancels_in_flight_pages() {
    let engine = Arc::new(FakeEngine::new().delay(1, 500).fail(2).delay(3, 500));
    let cfg = config(&engine).build().unwrap();

    let err = convert(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap_err();
    match err {
        CarouselError::BatchFailed {
            completed,
            total,
            source,
        } => {
            assert_eq!((completed, total), (0, 3));
            assert_eq!(source.page(), 2);
            assert!(matches!(source, PageError::Capture { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(engine.finished().is_empty(), "cancelled pages kept running");
}

#[tokio::test]
async fn partial_policy_reports_every_page_and_allows_retry() {
    let engine = Arc::new(FakeEngine::new().fail(2));
    let cfg = config(&engine)
        .failure_policy(FailurePolicy::Partial)
        .build()
        .unwrap();

    let batch = convert(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Partial);
    assert_eq!((batch.completed, batch.total), (2, 3));
    assert_eq!(batch.failed_pages(), vec![2]);
    assert_eq!(batch.pages[1].status, PageStatus::Failed);
    assert!(batch.pages[1].png.is_none());
    assert_eq!(batch.stats.failed_pages, 1);
    assert!(batch.clone().into_result().is_err());

    // Retry only the failed page against a healthy engine.
    let healthy = Arc::new(FakeEngine::new());
    let retry_cfg = config(&healthy)
        .pages(PageSelection::Set(batch.failed_pages()))
        .build()
        .unwrap();
    let retry = convert(THREE_PAGES, &PlaceholderMap::new(), &retry_cfg)
        .await
        .unwrap();
    assert_eq!(retry.pages.len(), 1);
    assert_eq!(retry.pages[0].page_num, 2);
    assert_eq!(retry.stats.total_pages, 3);
    assert_eq!(healthy.calls(), 1);
}

#[tokio::test]
async fn partial_policy_with_no_successes_is_an_error() {
    let engine = Arc::new(FakeEngine::new().fail(1).fail(2));
    let cfg = config(&engine)
        .failure_policy(FailurePolicy::Partial)
        .build()
        .unwrap();

    let err = convert("a\n---\nb", &PlaceholderMap::new(), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, CarouselError::AllPagesFailed { total: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn slow_page_times_out() {
    let engine = Arc::new(FakeEngine::new().delay(2, 10_000));
    let cfg = config(&engine)
        .page_timeout_secs(1)
        .failure_policy(FailurePolicy::Partial)
        .build()
        .unwrap();

    let batch = convert("a\n---\nb", &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    assert!(matches!(
        batch.pages[1].error,
        Some(PageError::Timeout { page: 2, secs: 1 })
    ));
    assert!(batch.pages[0].is_done());
}

/// One capture slot; each capture holds it for `hold`.
struct SingleSlotEngine {
    slot: tokio::sync::Semaphore,
    hold: Duration,
}

#[async_trait]
impl RenderEngine for SingleSlotEngine {
    fn name(&self) -> &str {
        "single-slot"
    }

    async fn capture(&self, _request: CaptureRequest) -> Result<Vec<u8>, EngineError> {
        tokio::time::sleep(self.hold).await;
        Ok(png(1080, 1440))
    }

    async fn capture_within(
        &self,
        request: CaptureRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        let _permit = self
            .slot
            .acquire()
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        tokio::time::timeout(timeout, self.capture(request))
            .await
            .unwrap_or(Err(EngineError::Timeout(timeout)))
    }
}

#[tokio::test(start_paused = true)]
async fn waiting_for_a_slot_does_not_count_against_the_timeout() {
    let engine = Arc::new(SingleSlotEngine {
        slot: tokio::sync::Semaphore::new(1),
        hold: Duration::from_secs(2),
    });
    let cfg = RenderConfig::builder()
        .engine(engine as Arc<dyn RenderEngine>)
        .concurrency(3)
        .page_timeout_secs(3)
        .build()
        .unwrap();

    // Page 3 waits 4s for the slot, longer than the 3s page timeout.
    let batch = convert(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    assert_eq!(batch.completed, 3);
}

#[tokio::test]
async fn engine_that_cannot_launch_is_unavailable() {
    struct NoBrowser;

    #[async_trait]
    impl RenderEngine for NoBrowser {
        fn name(&self) -> &str {
            "no-browser"
        }

        async fn capture(&self, _request: CaptureRequest) -> Result<Vec<u8>, EngineError> {
            Err(EngineError::Launch("chrome not found".into()))
        }
    }

    for policy in [FailurePolicy::FailFast, FailurePolicy::Partial] {
        let cfg = RenderConfig::builder()
            .engine(Arc::new(NoBrowser) as Arc<dyn RenderEngine>)
            .failure_policy(policy)
            .build()
            .unwrap();
        let err = convert("a\n---\nb", &PlaceholderMap::new(), &cfg)
            .await
            .unwrap_err();
        assert!(
            matches!(err, CarouselError::EngineUnavailable(ref d) if d == "chrome not found"),
            "{policy:?}: got {err:?}"
        );
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    progress: Mutex<Vec<BatchProgress>>,
    success: AtomicUsize,
}

impl RenderProgressCallback for Recorder {
    fn on_batch_start(&self, total_pages: usize) {
        self.started.store(total_pages, Ordering::SeqCst);
    }

    fn on_progress(&self, progress: BatchProgress) {
        self.progress.lock().unwrap().push(progress);
    }

    fn on_batch_complete(&self, _total_pages: usize, success_count: usize) {
        self.success.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_ends_at_100() {
    let engine = Arc::new(FakeEngine::new().delay(1, 30).delay(2, 10).fail(3));
    let recorder = Arc::new(Recorder::default());
    let cfg = config(&engine)
        .failure_policy(FailurePolicy::Partial)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    convert(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();

    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.success.load(Ordering::SeqCst), 2);

    let seen = recorder.progress.lock().unwrap().clone();
    let completed: Vec<_> = seen.iter().map(|p| p.completed).collect();
    assert_eq!(completed, vec![1, 2, 3]);
    let percents: Vec<_> = seen.iter().map(|p| p.percent()).collect();
    assert_eq!(percents, vec![33, 66, 100]);
}

// ── Images ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn placeholders_are_substituted_everywhere() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let mut images = PlaceholderMap::new();
    let key = images.register("data:image/png;base64,iVBORw0KGgo=");
    let doc = format!("![a]({key})\n\n![b]({key})");

    let batch = convert(&doc, &images, &cfg).await.unwrap();
    let html = engine.html(1);
    assert!(!html.contains(&key));
    assert_eq!(html.matches("data:image/png;base64,iVBORw0KGgo=").count(), 2);
    assert_eq!(batch.pages[0].source_text, doc);
}

#[tokio::test]
async fn missing_local_image_still_renders_the_page() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("uploads")).unwrap();
    std::fs::write(root.path().join("uploads/here.png"), png(4, 4)).unwrap();

    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).asset_root(root.path()).build().unwrap();

    let doc = "![a](/uploads/here.png)\n\n![b](/uploads/gone.png)\n\n![c](data:image/gif;base64,R0lGODlhAQABAAAAACw=)";
    let batch = convert(doc, &PlaceholderMap::new(), &cfg).await.unwrap();

    assert_eq!(batch.status, BatchStatus::Complete);
    let mut assets = engine.assets.lock().unwrap().clone();
    assets.sort();
    assert_eq!(assets, vec!["failed", "resolved", "resolved"]);
}

// ── Other entry points ───────────────────────────────────────────────────

#[tokio::test]
async fn single_image_mode_ignores_page_breaks() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let png = convert_single("# Hello\n---\n# Page2", &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    assert_eq!(dims(&png), (1080, 1440));
    assert_eq!(engine.calls(), 1);
    let html = engine.html(1);
    assert!(html.contains("Hello") && html.contains("Page2"));
}

#[tokio::test]
async fn stream_yields_every_page_with_errors_inline() {
    let engine = Arc::new(FakeEngine::new().fail(2));
    let cfg = config(&engine).build().unwrap();

    let stream = convert_stream(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 3);
    let mut ok: Vec<_> = items
        .iter()
        .filter_map(|r| r.as_ref().ok().map(|p| p.page_num))
        .collect();
    ok.sort();
    assert_eq!(ok, vec![1, 3]);
    let failed: Vec<_> = items
        .iter()
        .filter_map(|r| r.as_ref().err().map(|e| e.page()))
        .collect();
    assert_eq!(failed, vec![2]);
}

#[tokio::test]
async fn pages_are_written_to_a_directory() {
    let out = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let (batch, written) = convert_to_dir("a\n---\nb", &PlaceholderMap::new(), out.path(), &cfg)
        .await
        .unwrap();
    assert_eq!(batch.completed, 2);
    assert_eq!(written.len(), 2);
    assert!(out.path().join("page-1.png").is_file());
    assert!(out.path().join("page-2.png").is_file());
    assert!(!out.path().join("page-1.png.tmp").exists());
}

#[tokio::test]
async fn archive_holds_one_entry_per_page() {
    let engine = Arc::new(FakeEngine::new());
    let cfg = config(&engine).build().unwrap();

    let (_, bytes) = convert_to_archive(THREE_PAGES, &PlaceholderMap::new(), &cfg)
        .await
        .unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<_> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["page-1.png", "page-2.png", "page-3.png"]);

    let mut entry = zip.by_name("page-2.png").unwrap();
    let mut png = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut png).unwrap();
    assert_eq!(dims(&png), (1080, 1440));
}
