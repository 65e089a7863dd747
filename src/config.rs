//! Configuration types for markdown-to-carousel rendering.
//!
//! All batch behaviour is controlled through [`RenderConfig`], built via its
//! [`RenderConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share a config between the CLI, the HTTP service and library callers.

use crate::engine::RenderEngine;
use crate::error::CarouselError;
use crate::pipeline::assets::AssetResolver;
use crate::pipeline::transcode::MarkdownTranscoder;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one document-to-images conversion.
///
/// Built via [`RenderConfig::builder()`] or using [`RenderConfig::default()`].
///
/// # Example
/// ```rust
/// use md_carousel::{FailurePolicy, RenderConfig};
///
/// let config = RenderConfig::builder()
///     .concurrency(2)
///     .page_timeout_secs(20)
///     .failure_policy(FailurePolicy::Partial)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Maximum number of pages rendered at the same time. Default: 4.
    ///
    /// Every in-flight page holds one browser tab. Page count is chosen by
    /// whoever wrote the document, so fan-out is always capped.
    pub concurrency: usize,

    /// Per-page render timeout in seconds. Default: 60.
    pub page_timeout_secs: u64,

    /// How the document is cut into pages. Default: [`PageDelimiter::Rule`].
    pub delimiter: PageDelimiter,

    /// What a single page failure does to the batch. Default: fail fast.
    pub failure_policy: FailurePolicy,

    /// Which pages to render. Default: all.
    pub pages: PageSelection,

    /// Directory that local-storage image paths are read from. Default: `public`.
    ///
    /// An image reference `/uploads/a.png` is read from
    /// `<asset_root>/uploads/a.png`.
    pub asset_root: PathBuf,

    /// URL path prefix that marks an image as local storage. Default: `/uploads/`.
    pub asset_prefix: String,

    /// Browser launch settings for the built-in Chromium engine.
    pub chromium: ChromiumOptions,

    /// Pre-constructed engine. Takes precedence over the shared Chromium pool.
    pub engine: Option<Arc<dyn RenderEngine>>,

    /// Pre-constructed asset resolver. Default: a
    /// [`crate::pipeline::assets::LocalAssetResolver`] over `asset_root`.
    pub asset_resolver: Option<Arc<dyn AssetResolver>>,

    /// Pre-constructed transcoder, reused across requests when set.
    pub transcoder: Option<Arc<MarkdownTranscoder>>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            page_timeout_secs: 60,
            delimiter: PageDelimiter::default(),
            failure_policy: FailurePolicy::default(),
            pages: PageSelection::default(),
            asset_root: PathBuf::from("public"),
            asset_prefix: "/uploads/".to_string(),
            chromium: ChromiumOptions::default(),
            engine: None,
            asset_resolver: None,
            transcoder: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("concurrency", &self.concurrency)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("delimiter", &self.delimiter)
            .field("failure_policy", &self.failure_policy)
            .field("pages", &self.pages)
            .field("asset_root", &self.asset_root)
            .field("asset_prefix", &self.asset_prefix)
            .field("chromium", &self.chromium)
            .field("engine", &self.engine.as_ref().map(|e| e.name()))
            .field(
                "asset_resolver",
                &self.asset_resolver.as_ref().map(|_| "<dyn AssetResolver>"),
            )
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// The engine this config renders with: the injected one, or the
    /// process-wide [`ChromiumPool`](crate::ChromiumPool).
    pub fn render_engine(&self) -> Arc<dyn RenderEngine> {
        match &self.engine {
            Some(engine) => Arc::clone(engine),
            None => crate::engine::chromium::ChromiumPool::shared(&self.chromium),
        }
    }
}

/// Builder for [`RenderConfig`].
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn delimiter(mut self, delimiter: PageDelimiter) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.asset_root = root.into();
        self
    }

    pub fn asset_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.asset_prefix = prefix.into();
        self
    }

    pub fn chromium(mut self, options: ChromiumOptions) -> Self {
        self.config.chromium = options;
        self
    }

    pub fn engine(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn asset_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> Self {
        self.config.asset_resolver = Some(resolver);
        self
    }

    pub fn transcoder(mut self, transcoder: Arc<MarkdownTranscoder>) -> Self {
        self.config.transcoder = Some(transcoder);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, CarouselError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(CarouselError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.page_timeout_secs == 0 {
            return Err(CarouselError::InvalidConfig(
                "Page timeout must be ≥ 1 second".into(),
            ));
        }
        if !c.asset_prefix.starts_with('/') {
            return Err(CarouselError::InvalidConfig(format!(
                "Asset prefix must start with '/', got '{}'",
                c.asset_prefix
            )));
        }
        if let PageDelimiter::Marker(marker) = &c.delimiter {
            if marker.trim().is_empty() {
                return Err(CarouselError::InvalidConfig(
                    "Page marker must not be blank".into(),
                ));
            }
        }
        if c.chromium.max_tabs == 0 {
            return Err(CarouselError::InvalidConfig("max_tabs must be ≥ 1".into()));
        }
        if c.chromium.recycle_after_pages == 0 {
            return Err(CarouselError::InvalidConfig(
                "recycle_after_pages must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Chromium ─────────────────────────────────────────────────────────────

/// Launch settings for the shared headless Chromium process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChromiumOptions {
    /// Browser executable. `None` → located via `chrome-locate`.
    pub executable: Option<PathBuf>,

    /// Pass `--no-sandbox` (needed in most containers). Default: true.
    pub no_sandbox: bool,

    /// Relaunch the browser after this many captures. Default: 200.
    pub recycle_after_pages: usize,

    /// Seconds allowed for the browser to come up. Default: 30.
    pub launch_timeout_secs: u64,

    /// Tabs open at once across every batch sharing the browser. Default: 8.
    pub max_tabs: usize,

    /// Extra command-line switches.
    pub extra_args: Vec<String>,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: true,
            recycle_after_pages: 200,
            launch_timeout_secs: 30,
            max_tabs: 8,
            extra_args: Vec::new(),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where one page ends and the next begins.
///
/// `---` on its own line doubles as a markdown horizontal rule, so authors
/// who need rules inside a page switch to a dedicated marker line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageDelimiter {
    /// A line consisting of exactly `---` (surrounding whitespace ignored). (default)
    #[default]
    Rule,
    /// A line consisting of exactly this marker, e.g. `<!-- page -->`.
    Marker(String),
}

impl PageDelimiter {
    /// `true` when `line` separates two pages.
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim();
        match self {
            PageDelimiter::Rule => line == "---",
            PageDelimiter::Marker(marker) => line == marker.trim(),
        }
    }

    /// The line written between pages when a document is reassembled.
    pub fn as_line(&self) -> &str {
        match self {
            PageDelimiter::Rule => "---",
            PageDelimiter::Marker(marker) => marker.trim(),
        }
    }
}

/// What happens to the batch when a page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any page failure fails the batch; no partial results. (default)
    #[default]
    FailFast,
    /// Every page is attempted; failures are reported per page.
    Partial,
}

/// Specifies which pages of the document to render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Render all pages (default).
    #[default]
    All,
    /// Render a single page (1-indexed).
    Single(usize),
    /// Render a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Render specific pages (1-indexed, deduplicated). Used to retry the
    /// failed pages of a partial batch.
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
