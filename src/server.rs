//! HTTP service (feature `server`).
//!
//! | Route            | Body                                   | Response                       |
//! |------------------|----------------------------------------|--------------------------------|
//! | `POST /convert`  | `{markdown, images?}`                  | `{image}` (whole doc, one PNG) |
//! | `POST /render`   | `{markdown, images?, policy?}`         | `{pages, completed, total, status}` |
//! | `POST /archive`  | `{markdown, images?}`                  | `application/zip`              |
//! | `POST /upload`   | multipart `file`                       | `{url, key}`                   |
//! | `POST /generate` | `{prompt}`                             | `{content}`                    |
//! | `GET /health`    |                                        | `{status, version, chrome}`    |
//!
//! Failures are `{error}` with 400 for caller mistakes and 500 otherwise.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::archive::{build_archive, ARCHIVE_NAME};
use crate::config::{FailurePolicy, RenderConfig};
use crate::convert::{convert, convert_single};
use crate::engine::RenderEngine;
use crate::error::{CarouselError, UploadError};
use crate::generate::{ContentGenerator, TemplateGenerator};
use crate::output::{png_data_url, BatchStatus, GenerationBatch, PageStatus};
use crate::pipeline::placeholder::PlaceholderMap;
use crate::pipeline::transcode::MarkdownTranscoder;
use crate::uploads::{UploadStore, MAX_UPLOAD_BYTES};

/// JSON bodies carry inline data URLs, so they get more room than uploads.
const JSON_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: RenderConfig,
    pub uploads: Arc<UploadStore>,
    pub generator: Arc<dyn ContentGenerator>,
}

impl AppState {
    /// State with one transcoder shared by all requests and uploads stored
    /// under `upload_dir`.
    pub fn new(mut config: RenderConfig, upload_dir: impl Into<PathBuf>) -> Self {
        config
            .transcoder
            .get_or_insert_with(|| Arc::new(MarkdownTranscoder::new()));
        Self {
            config,
            uploads: Arc::new(UploadStore::new(upload_dir)),
            generator: Arc::new(TemplateGenerator),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = generator;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let upload_routes = Router::new()
        .route("/upload", post(upload))
        // Leave headroom over the limit so oversize files reach our own check.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024));

    Router::new()
        .route("/convert", post(convert_one))
        .route("/render", post(render_pages))
        .route("/archive", post(archive))
        .route("/generate", post(generate))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .merge(upload_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C, then close the browser.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), CarouselError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CarouselError::Internal(format!("Failed to bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);

    serve_until(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
}

/// Serve on `listener` until `shutdown` resolves. The engine is shut down
/// whether serving ends cleanly or with an error.
pub async fn serve_until<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), CarouselError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let engine = state.config.render_engine();
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    engine.shutdown().await;
    served.map_err(|e| CarouselError::Internal(format!("Server error: {e}")))
}

// ── Request / response bodies ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RenderRequest {
    pub markdown: Option<String>,
    pub images: PlaceholderMap,
    pub policy: Option<FailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenderedPage {
    pub page: usize,
    pub status: PageStatus,
    pub font_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub pages: Vec<RenderedPage>,
    pub completed: usize,
    pub total: usize,
    pub status: BatchStatus,
}

impl From<&GenerationBatch> for RenderResponse {
    fn from(batch: &GenerationBatch) -> Self {
        Self {
            pages: batch
                .pages
                .iter()
                .map(|p| RenderedPage {
                    page: p.page_num,
                    status: p.status,
                    font_size: p.font_size,
                    image: p.data_url(),
                    error: p.error.as_ref().map(|e| e.to_string()),
                })
                .collect(),
            completed: batch.completed,
            total: batch.total,
            status: batch.status,
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn convert_one(
    State(state): State<AppState>,
    body: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body?;
    let markdown = required_markdown(&req)?;
    let png = convert_single(markdown, &req.images, &state.config)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to convert markdown to image"))?;
    Ok(Json(json!({ "image": png_data_url(&png) })))
}

async fn render_pages(
    State(state): State<AppState>,
    body: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Json<RenderResponse>, ApiError> {
    let Json(req) = body?;
    let markdown = required_markdown(&req)?;
    let mut config = state.config.clone();
    if let Some(policy) = req.policy {
        config.failure_policy = policy;
    }
    let batch = convert(markdown, &req.images, &config)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to render pages"))?;
    Ok(Json(RenderResponse::from(&batch)))
}

async fn archive(
    State(state): State<AppState>,
    body: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    let markdown = required_markdown(&req)?;
    let batch = convert(markdown, &req.images, &state.config)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to render pages"))?;
    let zip = build_archive(&batch).map_err(ApiError::from)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{ARCHIVE_NAME}\""),
            ),
        ],
        zip,
    )
        .into_response())
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut multipart = multipart
        .map_err(|e| CarouselError::from(UploadError::Malformed(e.body_text())))?;
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(upload_error)?;

        let stored = state
            .uploads
            .store(&name, content_type.as_deref(), &bytes)
            .await
            .map_err(|e| ApiError::from(CarouselError::from(e)).context("Failed to upload file"))?;
        return Ok(Json(json!({ "url": stored.url, "key": stored.key })));
    }
    Err(CarouselError::from(UploadError::MissingFile).into())
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body?;
    let prompt = req.prompt.unwrap_or_default();
    let content = state
        .generator
        .generate(&prompt)
        .await
        .map_err(|e| ApiError::from(e).context("Failed to generate content"))?;
    Ok(Json(json!({ "content": content })))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "chrome": chrome_locate::is_chrome_available(),
    }))
}

fn required_markdown(req: &RenderRequest) -> Result<&str, ApiError> {
    match req.markdown.as_deref() {
        Some(md) if !md.trim().is_empty() => Ok(md),
        _ => Err(CarouselError::Validation {
            field: "Markdown content",
        }
        .into()),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// `{error}` JSON with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    /// Replace the message of a server-side error with `message`, keeping
    /// the original as `detail`. Client errors keep their own message.
    fn context(mut self, message: &str) -> Self {
        if self.status.is_server_error() {
            self.detail = Some(std::mem::replace(&mut self.message, message.to_string()));
        }
        self
    }

}

/// Multipart read failures are upload errors (400), including bodies cut
/// off by the transport limit.
fn upload_error(e: MultipartError) -> ApiError {
    let upload = if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::BodyTooLarge {
            max: MAX_UPLOAD_BYTES,
        }
    } else {
        UploadError::Malformed(e.body_text())
    };
    CarouselError::from(upload).into()
}

impl From<CarouselError> for ApiError {
    fn from(e: CarouselError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
            detail: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.body_text(),
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                status = %self.status,
                detail = self.detail.as_deref().unwrap_or(""),
                "{}",
                self.message
            );
        }
        let body = match self.detail {
            Some(detail) => json!({ "error": self.message, "detail": detail }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
