//! Headless Chromium over CDP, shared and recycled across batches.
//!
//! One browser process serves every capture in the process. Each capture
//! gets its own browser context (no shared cookies, cache or storage) and a
//! single tab, leased through [`PageLease`]. The browser is launched on first
//! use and relaunched after `recycle_after_pages` captures, or as soon as its
//! CDP event loop is found dead.
//!
//! ## Request interception
//!
//! Every request a page makes is paused with `Fetch.enable` and handed to
//! the capture's [`AssetResolver`]: resolved images are fulfilled from
//! memory, resolver failures fail the request (the page renders without the
//! image), and everything else continues to the network untouched.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CaptureRequest, EngineError, RenderEngine};
use crate::config::ChromiumOptions;
use crate::pipeline::assets::{AssetResolution, AssetResolver};

/// Resolves once every image has loaded or failed and web fonts are ready,
/// then waits two frames so layout is painted.
const SETTLE_SCRIPT: &str = r#"(async () => {
  const pending = Array.from(document.images).filter((img) => !img.complete);
  await Promise.all(pending.map((img) => new Promise((resolve) => {
    img.addEventListener('load', resolve, { once: true });
    img.addEventListener('error', resolve, { once: true });
  })));
  if (document.fonts && document.fonts.ready) {
    await document.fonts.ready;
  }
  await new Promise((resolve) => requestAnimationFrame(() => requestAnimationFrame(resolve)));
  return true;
})()"#;

/// Switches passed on every launch, on top of chromiumoxide's defaults.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-gpu",
    "--hide-scrollbars",
    "--disable-setuid-sandbox",
    "--font-render-hinting=none",
    "--force-color-profile=srgb",
];

/// Poll interval while a retired browser still has tabs leased.
const RETIRE_POLL: Duration = Duration::from_millis(250);

static SHARED: OnceCell<Arc<ChromiumPool>> = OnceCell::new();

/// Pool of tabs on one lazily launched, recyclable browser process.
pub struct ChromiumPool {
    options: ChromiumOptions,
    current: Mutex<Option<Arc<BrowserInstance>>>,
    tabs: Arc<Semaphore>,
    generation: AtomicU64,
}

impl ChromiumPool {
    /// A standalone pool. Nothing is launched until the first capture.
    pub fn new(options: ChromiumOptions) -> Self {
        let tabs = Arc::new(Semaphore::new(options.max_tabs.max(1)));
        Self {
            options,
            current: Mutex::new(None),
            tabs,
            generation: AtomicU64::new(0),
        }
    }

    /// The process-wide pool. The options of the first caller win.
    pub fn shared(options: &ChromiumOptions) -> Arc<ChromiumPool> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(ChromiumPool::new(options.clone()))))
    }

    pub fn options(&self) -> &ChromiumOptions {
        &self.options
    }

    /// Lease a fresh tab in its own browser context.
    pub async fn lease(&self) -> Result<PageLease, EngineError> {
        let permit = Arc::clone(&self.tabs)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Launch("tab pool closed".into()))?;

        let instance = self.instance().await?;
        instance.captures.fetch_add(1, Ordering::SeqCst);

        let context_id = instance
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| EngineError::Launch(format!("create browser context: {e}")))?
            .result
            .browser_context_id
            .clone();

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Launch)?;

        let page = match instance.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&instance.browser, context_id).await;
                return Err(EngineError::Launch(format!("open tab: {e}")));
            }
        };

        Ok(PageLease {
            page: Some(page),
            context_id: Some(context_id),
            instance,
            interceptor: None,
            _permit: permit,
        })
    }

    /// The live browser, launching or relaunching it when needed.
    async fn instance(&self) -> Result<Arc<BrowserInstance>, EngineError> {
        let mut current = self.current.lock().await;

        if let Some(instance) = current.as_ref() {
            let exhausted =
                instance.captures.load(Ordering::SeqCst) >= self.options.recycle_after_pages;
            let dead = instance.handler.is_finished();
            if !exhausted && !dead {
                return Ok(Arc::clone(instance));
            }
            info!(
                generation = instance.generation,
                captures = instance.captures.load(Ordering::SeqCst),
                dead,
                "Recycling Chromium"
            );
            if let Some(old) = current.take() {
                tokio::spawn(retire(old));
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let instance = Arc::new(BrowserInstance::launch(&self.options, generation).await?);
        *current = Some(Arc::clone(&instance));
        Ok(instance)
    }
}

#[async_trait]
impl RenderEngine for ChromiumPool {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, EngineError> {
        let mut lease = self.lease().await?;
        let result = lease.render(&request).await;
        lease.release().await;
        result
    }

    /// Waiting for a tab and launching the browser are outside `timeout`;
    /// launch is bounded by `launch_timeout_secs` instead.
    async fn capture_within(
        &self,
        request: CaptureRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        let mut lease = self.lease().await?;
        let result = tokio::time::timeout(timeout, lease.render(&request))
            .await
            .unwrap_or(Err(EngineError::Timeout(timeout)));
        lease.release().await;
        result
    }

    async fn shutdown(&self) {
        let instance = self.current.lock().await.take();
        if let Some(instance) = instance {
            retire(instance).await;
        }
    }
}

/// One launched browser process and its CDP event loop.
struct BrowserInstance {
    browser: Browser,
    handler: JoinHandle<()>,
    captures: AtomicUsize,
    generation: u64,
    _profile: tempfile::TempDir,
}

impl BrowserInstance {
    async fn launch(options: &ChromiumOptions, generation: u64) -> Result<Self, EngineError> {
        let executable = match &options.executable {
            Some(path) => path.clone(),
            None => chrome_locate::locate_chrome().map_err(|e| EngineError::Launch(e.to_string()))?,
        };
        let profile = tempfile::Builder::new()
            .prefix("carousel-chromium-")
            .tempdir()
            .map_err(|e| EngineError::Launch(format!("profile dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&executable)
            .user_data_dir(profile.path())
            .launch_timeout(Duration::from_secs(options.launch_timeout_secs))
            .args(LAUNCH_ARGS.iter().copied())
            .args(options.extra_args.iter().cloned());
        if options.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(EngineError::Launch)?;

        info!(generation, executable = %executable.display(), "Launching Chromium");
        let (browser, events) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Launch(format!("{}: {e}", executable.display())))?;

        let handler = tokio::spawn(async move {
            drive_events(events, generation).await;
        });

        Ok(Self {
            browser,
            handler,
            captures: AtomicUsize::new(0),
            generation,
            _profile: profile,
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(generation = self.generation, "Chromium close: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            debug!(generation = self.generation, "Chromium wait: {e}");
        }
        self.handler.abort();
        info!(generation = self.generation, "Chromium closed");
    }
}

impl Drop for BrowserInstance {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Poll the CDP connection until it closes. Errors are per message; the
/// connection is gone only when the stream ends. Returns the number of
/// events seen.
async fn drive_events<S, T, E>(mut events: S, generation: u64) -> usize
where
    S: futures::Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut seen = 0;
    while let Some(event) = events.next().await {
        seen += 1;
        if let Err(e) = event {
            warn!(generation, "Chromium event error: {e}");
        }
    }
    debug!(generation, "Chromium event loop stopped");
    seen
}

/// Close `instance` once the last lease on it has been released.
async fn retire(mut instance: Arc<BrowserInstance>) {
    loop {
        match Arc::try_unwrap(instance) {
            Ok(owned) => return owned.close().await,
            Err(shared) => {
                instance = shared;
                tokio::time::sleep(RETIRE_POLL).await;
            }
        }
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        debug!("Dispose browser context: {e}");
    }
}

/// A tab in its own browser context, held for one capture.
///
/// Call [`PageLease::release`] when done. If the lease is dropped without
/// it (the capture future was cancelled, e.g. by a timeout) the tab and its
/// context are closed on a background task.
pub struct PageLease {
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    instance: Arc<BrowserInstance>,
    interceptor: Option<JoinHandle<()>>,
    _permit: OwnedSemaphorePermit,
}

impl PageLease {
    /// Load `request.html` and capture the canvas.
    pub async fn render(&mut self, request: &CaptureRequest) -> Result<Vec<u8>, EngineError> {
        let page = self
            .page
            .clone()
            .ok_or_else(|| EngineError::Navigation("tab already released".into()))?;
        let canvas = request.canvas;

        // ── Viewport ─────────────────────────────────────────────────────
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(canvas.width),
            i64::from(canvas.height),
            canvas.device_scale_factor,
            false,
        ))
        .await
        .map_err(|e| EngineError::Navigation(format!("set viewport: {e}")))?;

        // ── Interception ─────────────────────────────────────────────────
        let paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| EngineError::Navigation(format!("listen for requests: {e}")))?;
        self.interceptor = Some(tokio::spawn(intercept(
            page.clone(),
            paused,
            Arc::clone(&request.resolver),
            request.page_num,
        )));
        let enable = EnableParams::builder()
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build(),
            )
            .build();
        page.execute(enable)
            .await
            .map_err(|e| EngineError::Navigation(format!("enable interception: {e}")))?;

        // ── Load and settle ──────────────────────────────────────────────
        page.set_content(&request.html)
            .await
            .map_err(|e| EngineError::Navigation(format!("set content: {e}")))?;

        let settle = EvaluateParams::builder()
            .expression(SETTLE_SCRIPT)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(EngineError::Navigation)?;
        let settled = page
            .execute(settle)
            .await
            .map_err(|e| EngineError::Navigation(format!("wait for layout: {e}")))?;
        if let Some(exception) = &settled.result.exception_details {
            return Err(EngineError::Navigation(format!(
                "layout script threw: {}",
                exception.text
            )));
        }

        // ── Capture ──────────────────────────────────────────────────────
        let shot = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(Viewport {
                x: 0.0,
                y: 0.0,
                width: f64::from(canvas.width),
                height: f64::from(canvas.height),
                scale: 1.0,
            })
            .from_surface(true)
            .capture_beyond_viewport(false)
            .build();
        let png = page
            .screenshot(shot)
            .await
            .map_err(|e| EngineError::Capture(e.to_string()))?;

        debug!(
            page = request.page_num,
            bytes = png.len(),
            generation = self.instance.generation,
            "Captured page"
        );
        Ok(png)
    }

    /// Close the tab and dispose of its browser context.
    pub async fn release(mut self) {
        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
        let page = self.page.take();
        let context_id = self.context_id.take();
        close_tab(&self.instance.browser, page, context_id).await;
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(task) = self.interceptor.take() {
            task.abort();
        }
        if self.page.is_none() && self.context_id.is_none() {
            return;
        }
        let page = self.page.take();
        let context_id = self.context_id.take();
        let instance = Arc::clone(&self.instance);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    close_tab(&instance.browser, page, context_id).await;
                });
            }
            Err(_) => warn!("Tab dropped outside a runtime; it closes with the browser"),
        }
    }
}

async fn close_tab(browser: &Browser, page: Option<Page>, context_id: Option<BrowserContextId>) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            debug!("Close tab: {e}");
        }
    }
    if let Some(context_id) = context_id {
        dispose_context(browser, context_id).await;
    }
}

/// Answer paused requests from `resolver` until the tab goes away.
async fn intercept(
    page: Page,
    mut paused: chromiumoxide::listeners::EventStream<EventRequestPaused>,
    resolver: Arc<dyn AssetResolver>,
    page_num: usize,
) {
    while let Some(event) = paused.next().await {
        let url = event.request.url.clone();
        let request_id = event.request_id.clone();

        let outcome = match resolver.resolve(&url).await {
            AssetResolution::Resolved(asset) => {
                debug!(page = page_num, %url, bytes = asset.bytes.len(), "Fulfilling request");
                let fulfil = FulfillRequestParams::builder()
                    .request_id(request_id.clone())
                    .response_code(200)
                    .response_header(HeaderEntry::new("Content-Type", asset.content_type))
                    .body(STANDARD.encode(&asset.bytes))
                    .build();
                match fulfil {
                    Ok(params) => page.execute(params).await.map(|_| ()),
                    Err(e) => {
                        warn!(page = page_num, %url, "Cannot fulfil request: {e}");
                        page.execute(FailRequestParams::new(request_id, ErrorReason::Failed))
                            .await
                            .map(|_| ())
                    }
                }
            }
            AssetResolution::Passthrough => page
                .execute(ContinueRequestParams::new(request_id))
                .await
                .map(|_| ()),
            AssetResolution::Failed(_) => page
                .execute(FailRequestParams::new(request_id, ErrorReason::Failed))
                .await
                .map(|_| ()),
        };

        if let Err(e) = outcome {
            debug!(page = page_num, %url, "Interception reply failed: {e}");
        }
    }
}
