//! CLI binary for md-carousel.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `RenderConfig` and writes the rendered pages.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use md_carousel::{
    build_archive, convert, convert_to_dir, ChromiumOptions, ContentGenerator, FailurePolicy,
    GenerationBatch, PageDelimiter, PageSelection, PlaceholderMap, RenderConfig, RenderEngine,
    RenderProgressCallback, TemplateGenerator, ARCHIVE_NAME,
};
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────

/// Live progress bar plus one log line per page. Pages finish out of order
/// when rendered concurrently, so start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Starting browser…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
    }

    fn elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, png_len: usize) {
        let secs = self.elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:>6} KiB", png_len / 1024)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages rendered  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render every page into ./carousel-pages/page-N.png
  carousel render post.md

  # Zip the pages instead
  carousel render post.md --zip -o out/

  # Fill an image placeholder from a local file
  carousel render post.md --image image-<uuid>=photos/cat.png

  # Keep going when a page fails, then retry only pages 2 and 5
  carousel render post.md --policy partial
  carousel render post.md --pages 2,5

  # Split on a dedicated marker so `---` stays a horizontal rule
  carousel render post.md --marker '<!-- page -->'

  # HTTP service
  carousel serve --addr 0.0.0.0:3000

ENVIRONMENT VARIABLES:
  CHROME_PATH             Chrome/Chromium executable to drive
  CAROUSEL_CONCURRENCY    Pages rendered at once
  CAROUSEL_TIMEOUT        Per-page timeout in seconds
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Render markdown documents into 1080×1440 PNG carousel pages.
#[derive(Parser, Debug)]
#[command(
    name = "carousel",
    version,
    about = "Render markdown documents into 1080x1440 PNG carousel pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CAROUSEL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CAROUSEL_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a markdown file into PNG pages.
    Render(RenderArgs),
    /// Run the HTTP service.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
    /// Print a starter document for a topic.
    Generate {
        /// Topic used as the document title.
        prompt: String,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Markdown file, or `-` for stdin.
    input: PathBuf,

    /// Output directory.
    #[arg(short, long, env = "CAROUSEL_OUTPUT", default_value = "carousel-pages")]
    output: PathBuf,

    /// Write a single zip archive instead of individual PNGs.
    #[arg(long)]
    zip: bool,

    /// Image placeholder: KEY=PATH (local file) or KEY=URL. Repeatable.
    #[arg(long = "image", value_name = "KEY=PATH")]
    images: Vec<String>,

    /// Pages rendered at once.
    #[arg(short, long, env = "CAROUSEL_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-page timeout in seconds.
    #[arg(long, env = "CAROUSEL_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// What a failed page does to the batch.
    #[arg(long, env = "CAROUSEL_POLICY", value_enum, default_value = "fail-fast")]
    policy: PolicyArg,

    /// Split on this marker line instead of `---`.
    #[arg(long, env = "CAROUSEL_MARKER")]
    marker: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "CAROUSEL_PAGES", default_value = "all")]
    pages: String,

    #[command(flatten)]
    engine: EngineArgs,

    /// Print the batch summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CAROUSEL_NO_PROGRESS")]
    no_progress: bool,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "CAROUSEL_ADDR", default_value = "127.0.0.1:3000")]
    addr: std::net::SocketAddr,

    /// Directory uploads are written to.
    #[arg(long, env = "CAROUSEL_UPLOAD_DIR", default_value = "public/uploads")]
    upload_dir: PathBuf,

    /// Pages rendered at once per request.
    #[arg(short, long, env = "CAROUSEL_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-page timeout in seconds.
    #[arg(long, env = "CAROUSEL_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Chrome/Chromium executable.
    #[arg(long, env = "CHROME_PATH")]
    chrome: Option<PathBuf>,

    /// Run the browser with its sandbox enabled.
    #[arg(long, env = "CAROUSEL_SANDBOX")]
    sandbox: bool,

    /// Directory local `/uploads/...` image paths are read from.
    #[arg(long, env = "CAROUSEL_ASSET_ROOT", default_value = "public")]
    asset_root: PathBuf,
}

impl EngineArgs {
    fn chromium(&self) -> ChromiumOptions {
        ChromiumOptions {
            executable: self.chrome.clone(),
            no_sandbox: !self.sandbox,
            ..ChromiumOptions::default()
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    FailFast,
    Partial,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::Partial => FailurePolicy::Partial,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is visible.
    let show_progress = match &cli.command {
        Command::Render(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Render(args) => render(args, show_progress, cli.quiet).await,
        #[cfg(feature = "server")]
        Command::Serve(args) => serve(args).await,
        Command::Generate { prompt } => {
            let draft = TemplateGenerator
                .generate(&prompt)
                .await
                .context("Generation failed")?;
            println!("{draft}");
            Ok(())
        }
    }
}

async fn render(args: RenderArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let markdown = read_input(&args.input).await?;
    let placeholders = parse_images(&args.images).await?;

    let mut builder = RenderConfig::builder()
        .concurrency(args.concurrency)
        .page_timeout_secs(args.timeout)
        .failure_policy(args.policy.into())
        .pages(parse_pages(&args.pages)?)
        .asset_root(args.engine.asset_root.clone())
        .chromium(args.engine.chromium());
    if let Some(marker) = &args.marker {
        builder = builder.delimiter(PageDelimiter::Marker(marker.clone()));
    }
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new());
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Run ──────────────────────────────────────────────────────────────
    // The shared pool is never dropped; close the browser on every exit path.
    let outcome = write_pages(&args, &markdown, &placeholders, &config, quiet).await;
    config.render_engine().shutdown().await;
    let batch = outcome?;

    if args.json {
        let json = serde_json::to_string_pretty(&batch).context("Failed to serialise batch")?;
        println!("{json}");
    } else if !quiet && !show_progress {
        eprintln!(
            "Rendered {}/{} pages in {}ms",
            batch.completed, batch.total, batch.stats.total_duration_ms
        );
    }

    let failed = batch.failed_pages();
    if !failed.is_empty() && !quiet {
        let list: Vec<String> = failed.iter().map(usize::to_string).collect();
        eprintln!(
            "   {} retry with: --pages {}",
            cyan("↻"),
            dim(&list.join(","))
        );
    }

    Ok(())
}

/// Render and write either the zip or one file per page.
async fn write_pages(
    args: &RenderArgs,
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
    quiet: bool,
) -> Result<GenerationBatch> {
    if args.zip {
        let batch = convert(markdown, placeholders, config)
            .await
            .context("Rendering failed")?;
        let zip = build_archive(&batch).context("Failed to build archive")?;
        tokio::fs::create_dir_all(&args.output)
            .await
            .with_context(|| format!("Failed to create {}", args.output.display()))?;
        let path = args.output.join(ARCHIVE_NAME);
        tokio::fs::write(&path, zip)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !quiet {
            eprintln!("   → {}", bold(&path.display().to_string()));
        }
        Ok(batch)
    } else {
        let (batch, written) = convert_to_dir(markdown, placeholders, &args.output, config)
            .await
            .context("Rendering failed")?;
        if !quiet {
            eprintln!(
                "   {} files → {}",
                written.len(),
                bold(&args.output.display().to_string())
            );
        }
        Ok(batch)
    }
}

#[cfg(feature = "server")]
async fn serve(args: ServeArgs) -> Result<()> {
    use md_carousel::server::{self, AppState};

    let config = RenderConfig::builder()
        .concurrency(args.concurrency)
        .page_timeout_secs(args.timeout)
        .asset_root(args.engine.asset_root.clone())
        .chromium(args.engine.chromium())
        .build()
        .context("Invalid configuration")?;

    server::serve(args.addr, AppState::new(config, args.upload_dir))
        .await
        .context("Server failed")
}

async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// `KEY=PATH` pairs. Existing files are inlined as data URLs; anything
/// else is used as the image URL verbatim.
async fn parse_images(pairs: &[String]) -> Result<PlaceholderMap> {
    let mut map = PlaceholderMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=PATH, got '{pair}'"))?;
        let path = Path::new(value);
        let payload = if path.is_file() {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            let mime = image::guess_format(&bytes)
                .map(|f| f.to_mime_type())
                .with_context(|| format!("{} is not a supported image", path.display()))?;
            format!("data:{};base64,{}", mime, STANDARD.encode(&bytes))
        } else {
            value.to_string()
        };
        map.insert(key.trim(), payload);
    }
    Ok(map)
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
