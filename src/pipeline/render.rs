//! One render job: prepared page → 1080×1440 PNG.
//!
//! Builds the page document, hands it to the engine with the per-page
//! timeout, and validates what comes back. Engine errors are attributed to
//! the page here.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::debug;

use super::assets::{AssetResolver, LocalAssetResolver, ASSET_BASE};
use super::{encode, highlight, style, CanvasGeometry, PreparedPage, CANVAS};
use crate::config::RenderConfig;
use crate::engine::{CaptureRequest, RenderEngine};
use crate::error::PageError;

/// Highlight theme CSS, built once per process.
static HIGHLIGHT_CSS: Lazy<String> = Lazy::new(highlight::theme_css);

/// Shared, read-only state for every render job of a batch.
#[derive(Clone)]
pub struct RenderContext {
    pub engine: Arc<dyn RenderEngine>,
    pub resolver: Arc<dyn AssetResolver>,
    pub canvas: CanvasGeometry,
    pub timeout: Duration,
}

impl RenderContext {
    /// Engine and resolver from `config`, from most-specific to least:
    ///
    /// 1. a pre-built engine / resolver on the config, used as-is
    /// 2. the process-wide [`crate::ChromiumPool`] and a [`LocalAssetResolver`]
    ///    over `asset_root` / `asset_prefix`
    pub fn from_config(config: &RenderConfig) -> Self {
        let engine = config.render_engine();
        let resolver: Arc<dyn AssetResolver> = match &config.asset_resolver {
            Some(resolver) => Arc::clone(resolver),
            None => Arc::new(LocalAssetResolver::new(
                config.asset_root.clone(),
                config.asset_prefix.clone(),
            )),
        };
        Self {
            engine,
            resolver,
            canvas: CANVAS,
            timeout: Duration::from_secs(config.page_timeout_secs),
        }
    }
}

/// The complete HTML document the engine loads for `page`.
pub fn page_html(page: &PreparedPage, canvas: &CanvasGeometry) -> String {
    let css = style::stylesheet(&page.scale, canvas, &HIGHLIGHT_CSS);
    style::page_document(&page.markup, &css, Some(ASSET_BASE))
}

/// Render one page. The returned PNG is exactly the canvas size.
pub async fn render_page(ctx: &RenderContext, page: &PreparedPage) -> Result<Vec<u8>, PageError> {
    let page_num = page.page_num();
    let request = CaptureRequest {
        page_num,
        html: page_html(page, &ctx.canvas),
        canvas: ctx.canvas,
        resolver: Arc::clone(&ctx.resolver),
    };

    debug!(
        page = page_num,
        font_size = page.font_size(),
        engine = ctx.engine.name(),
        "Rendering page"
    );

    let raw = ctx
        .engine
        .capture_within(request, ctx.timeout)
        .await
        .map_err(|e| e.into_page_error(page_num))?;

    encode::normalise_capture(&raw, &ctx.canvas).map_err(|e| PageError::InvalidImage {
        page: page_num,
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::pipeline::typography::TypeScale;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<Vec<u8>, EngineError>,
        delay: Duration,
        seen_html: Mutex<Option<String>>,
    }

    #[async_trait]
    impl RenderEngine for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn capture(&self, request: CaptureRequest) -> Result<Vec<u8>, EngineError> {
            *self.seen_html.lock().unwrap() = Some(request.html);
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn ctx(reply: Result<Vec<u8>, EngineError>, delay: Duration, timeout: Duration) -> (RenderContext, Arc<Scripted>) {
        let engine = Arc::new(Scripted {
            reply,
            delay,
            seen_html: Mutex::new(None),
        });
        let ctx = RenderContext {
            engine: engine.clone(),
            resolver: Arc::new(LocalAssetResolver::new("public", "/uploads/")),
            canvas: CANVAS,
            timeout,
        };
        (ctx, engine)
    }

    fn page() -> PreparedPage {
        PreparedPage {
            index: 1,
            source_text: "# Hi".into(),
            resolved_text: "# Hi".into(),
            markup: "<h1>Hi</h1>".into(),
            scale: TypeScale::new(72),
        }
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(w, h));
        encode::encode_png(&img).unwrap()
    }

    #[tokio::test]
    async fn wrong_size_capture_is_normalised() {
        let (ctx, engine) = ctx(Ok(png(540, 720)), Duration::ZERO, Duration::from_secs(5));
        let out = render_page(&ctx, &page()).await.unwrap();
        assert_eq!(encode::dimensions(&out).unwrap(), (1080, 1440));

        let html = engine.seen_html.lock().unwrap().clone().unwrap();
        assert!(html.contains("<h1>Hi</h1>"));
        assert!(html.contains("h1 { font-size: 158.4px;"));
        assert!(html.contains(ASSET_BASE));
    }

    #[tokio::test]
    async fn engine_error_carries_page_number() {
        let (ctx, _) = ctx(
            Err(EngineError::Capture("target crashed".into())),
            Duration::ZERO,
            Duration::from_secs(5),
        );
        let err = render_page(&ctx, &page()).await.unwrap_err();
        assert!(matches!(err, PageError::Capture { page: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_engine_times_out() {
        let (ctx, _) = ctx(Ok(png(1080, 1440)), Duration::from_secs(30), Duration::from_secs(2));
        let err = render_page(&ctx, &page()).await.unwrap_err();
        assert_eq!(err.page(), 2);
        assert!(matches!(err, PageError::Timeout { secs: 2, .. }));
    }

    #[tokio::test]
    async fn non_image_bytes_are_invalid() {
        let (ctx, _) = ctx(Ok(b"nope".to_vec()), Duration::ZERO, Duration::from_secs(5));
        let err = render_page(&ctx, &page()).await.unwrap_err();
        assert!(matches!(err, PageError::InvalidImage { page: 2, .. }));
    }
}
