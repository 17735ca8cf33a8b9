//! CLI binary for html2pdf-strips.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! prepares the dependency cache and reports per-document results.

use anyhow::{Context, Result};
use asset_cache::{asset_cache_dir, AssetEntry, AssetManifest, DependencyCache};
use clap::Parser;
use html2pdf_strips::pipeline::input::discover_documents;
use html2pdf_strips::{
    BatchConfig, BatchDriver, BatchProgressCallback, BatchSummary, CaptureMode, PageEncoding,
    ProgressCallback, RouteResolver, StripPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one live bar plus a ✓/⏭/✗ line per document.
/// Documents finish out of order, so every line names its file.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
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
        bar.set_message("Launching browser…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.set_message("");
        self.bar.reset_eta();
    }

    fn elapsed(&self, input: &Path) -> String {
        let secs = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(input))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, input: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(input.to_path_buf(), Instant::now());
        }
        self.bar.set_message(file_name(input));
    }

    fn on_document_complete(&self, input: &Path, pages: usize) {
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            file_name(input),
            dim(&format!("{pages:>3} pages")),
            self.elapsed(input),
        ));
        self.bar.inc(1);
    }

    fn on_document_skipped(&self, input: &Path, output: &Path) {
        self.bar.println(format!(
            "  {} {:<40}  {}",
            yellow("⏭"),
            file_name(input),
            dim(&format!("{} exists", file_name(output))),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, input: &Path, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            file_name(input),
            red(&msg),
            self.elapsed(input),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        print_summary(summary);
    }
}

fn print_summary(summary: &BatchSummary) {
    let mark = if summary.failed == 0 {
        green("✔")
    } else if summary.failed == summary.total {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{mark} {} converted, {} skipped, {} failed  {}",
        bold(&summary.converted.to_string()),
        summary.skipped,
        if summary.failed == 0 {
            summary.failed.to_string()
        } else {
            red(&summary.failed.to_string())
        },
        dim(&format!(
            "{} pages, {:.1}s",
            summary.total_pages,
            summary.total_duration_ms as f64 / 1000.0
        )),
    );
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every .html file in a directory (skips existing PDFs)
  html2pdf ./exports

  # Eight documents at once, wide viewport, retina capture
  html2pdf ./exports -c 8 --viewport-width 1920 --scale 2

  # Re-render everything, JPEG pages, machine-readable report
  html2pdf ./exports --force --encoding jpeg --jpeg-quality 80 --json > report.json

  # Capture in one shot instead of scrolling
  html2pdf ./exports --mode full-page

  # Fail the job (exit 2) if any document failed
  html2pdf ./exports --strict

  # Serve an extra CDN script from the local cache
  html2pdf ./exports --asset https://cdn.example.com/lib.js=lib.js

OUTPUT:
  <dir>/<name>.html  →  <dir>/<name>.pdf, one page per strip of at most
  --max-strip-height pixels. Existing PDFs are skipped unless --force.

EXIT STATUS:
  0  batch finished (even with failed documents, unless --strict)
  1  setup failed: bad input directory, asset download, browser launch
  2  --strict and at least one document failed

ENVIRONMENT VARIABLES:
  HTML2PDF_CHROME             Chrome/Chromium binary (default: auto-detect)
  HTML2PDF_ASSET_CACHE_DIR    Dependency cache directory
  RUST_LOG                    Override log filtering (e.g. html2pdf_strips=debug)
  Every option also reads HTML2PDF_<OPTION>, e.g. HTML2PDF_CONCURRENCY.
"#;

/// Batch-convert HTML documents to multi-page PDFs via headless Chrome.
#[derive(Parser, Debug)]
#[command(
    name = "html2pdf",
    version,
    about = "Batch-convert HTML documents to multi-page PDFs via headless Chrome",
    long_about = "Render every HTML file of a directory in headless Chrome, capture the full page \
as viewport screenshots, stitch them into height-limited strips and write one PDF per document \
with one page per strip.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the .html files to convert.
    input: PathBuf,

    /// Documents converted at once.
    #[arg(short, long, env = "HTML2PDF_CONCURRENCY", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=64))]
    concurrency: u32,

    /// Viewport width in CSS pixels.
    #[arg(long, env = "HTML2PDF_VIEWPORT_WIDTH", default_value_t = 1280)]
    viewport_width: u32,

    /// Viewport height in CSS pixels (height of one screenshot tile).
    #[arg(long, env = "HTML2PDF_VIEWPORT_HEIGHT", default_value_t = 720)]
    viewport_height: u32,

    /// Device scale factor (0.25–4).
    #[arg(long, env = "HTML2PDF_SCALE", default_value_t = 1.0)]
    scale: f64,

    /// Maximum pixel height of one PDF page.
    #[arg(long, env = "HTML2PDF_MAX_STRIP_HEIGHT", default_value_t = 65_000)]
    max_strip_height: u32,

    /// Capture strategy.
    #[arg(long, env = "HTML2PDF_MODE", value_enum, default_value = "scroll")]
    mode: ModeArg,

    /// How tiles are grouped into pages.
    #[arg(long, env = "HTML2PDF_STRIP_POLICY", value_enum, default_value = "exact")]
    strip_policy: StripPolicyArg,

    /// Page image compression.
    #[arg(long, env = "HTML2PDF_ENCODING", value_enum, default_value = "flate")]
    encoding: EncodingArg,

    /// JPEG quality (1–100), used with --encoding jpeg.
    #[arg(long, env = "HTML2PDF_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Pixels per inch used to size PDF pages.
    #[arg(long, env = "HTML2PDF_DPI", default_value_t = 72.0)]
    dpi: f32,

    /// Pause after each scroll, in milliseconds.
    #[arg(long, env = "HTML2PDF_SETTLE_MS", default_value_t = 100)]
    settle_ms: u64,

    /// Network quiet window that counts as idle, in milliseconds.
    #[arg(long, env = "HTML2PDF_IDLE_MS", default_value_t = 500)]
    idle_ms: u64,

    /// Per-document navigation timeout in seconds.
    #[arg(long, env = "HTML2PDF_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Cancel the whole batch after this many seconds.
    #[arg(long, env = "HTML2PDF_BATCH_TIMEOUT")]
    batch_timeout: Option<u64>,

    /// Chrome/Chromium binary.
    #[arg(long, env = "HTML2PDF_CHROME")]
    chrome: Option<PathBuf>,

    /// Re-render documents whose PDF already exists.
    #[arg(long, env = "HTML2PDF_FORCE")]
    force: bool,

    /// Exit with status 2 if any document failed.
    #[arg(long, env = "HTML2PDF_STRICT")]
    strict: bool,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "HTML2PDF_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "HTML2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HTML2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "HTML2PDF_QUIET")]
    quiet: bool,

    /// Dependency cache directory.
    #[arg(long, env = "HTML2PDF_ASSET_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Extra cached asset as URL=FILE (repeatable).
    #[arg(long = "asset", value_name = "URL=FILE", env = "HTML2PDF_ASSETS", value_delimiter = ',')]
    assets: Vec<String>,

    /// Let CDN requests go to the network instead of the local cache.
    #[arg(long, env = "HTML2PDF_NO_ASSET_CACHE")]
    no_asset_cache: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Scroll,
    FullPage,
}

impl From<ModeArg> for CaptureMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Scroll => CaptureMode::Scroll,
            ModeArg::FullPage => CaptureMode::FullPage,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StripPolicyArg {
    Exact,
    WholeTiles,
}

impl From<StripPolicyArg> for StripPolicy {
    fn from(v: StripPolicyArg) -> Self {
        match v {
            StripPolicyArg::Exact => StripPolicy::RowExact,
            StripPolicyArg::WholeTiles => StripPolicy::WholeTiles,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EncodingArg {
    Flate,
    Jpeg,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Validate input before touching the network ───────────────────────
    discover_documents(&cli.input, "html").context("Invalid input directory")?;

    // ── Dependency cache ─────────────────────────────────────────────────
    let resolver = if cli.no_asset_cache {
        None
    } else {
        Some(prepare_asset_cache(&cli).await?)
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, resolver, progress_cb)?;

    // ── Run batch ────────────────────────────────────────────────────────
    let driver = BatchDriver::new(config);
    let cancel = driver.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} interrupted, finishing up…", yellow("⚠"));
            cancel.cancel();
        }
    });

    let report = driver.run(&cli.input).await.context("Batch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    }
    if !cli.quiet && !show_progress {
        print_summary(&report.summary);
        for doc in report.failures() {
            if let Some(e) = doc.outcome.error() {
                eprintln!("  {} {}: {e}", red("✗"), doc.input.display());
            }
        }
    }

    if cli.strict && report.summary.failed > 0 {
        std::process::exit(2);
    }
    Ok(())
}

/// Download missing assets (with a byte progress bar) and load the cache.
async fn prepare_asset_cache(cli: &Cli) -> Result<Arc<dyn RouteResolver>> {
    let mut manifest = AssetManifest::default();
    for raw in &cli.assets {
        let entry = AssetEntry::parse(raw).with_context(|| format!("Invalid --asset '{raw}'"))?;
        manifest = manifest.with_entry(entry);
    }
    let dir = cli.cache_dir.clone().unwrap_or_else(asset_cache_dir);

    let dl_bar = if cli.quiet || cli.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {bytes}/{total_bytes}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Assets");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    };

    let bar = dl_bar.clone();
    let cache = tokio::task::spawn_blocking(move || {
        DependencyCache::populate(
            &dir,
            &manifest,
            Some(&|url: &str, downloaded: u64, total: Option<u64>| {
                if let Some(t) = total {
                    if bar.length() != Some(t) {
                        bar.set_length(t);
                        bar.set_message(url.rsplit('/').next().unwrap_or(url).to_string());
                    }
                }
                bar.set_position(downloaded);
            }),
        )
    })
    .await
    .context("Asset download task failed")?
    .context("Failed to populate the dependency cache")?;
    dl_bar.finish_and_clear();

    tracing::info!("Dependency cache ready: {} assets in {}", cache.len(), cache.dir().display());
    Ok(Arc::new(cache))
}

/// Map CLI args to `BatchConfig`.
fn build_config(
    cli: &Cli,
    resolver: Option<Arc<dyn RouteResolver>>,
    progress: Option<ProgressCallback>,
) -> Result<BatchConfig> {
    let encoding = match cli.encoding {
        EncodingArg::Flate => PageEncoding::Flate,
        EncodingArg::Jpeg => PageEncoding::Jpeg {
            quality: cli.jpeg_quality,
        },
    };

    let mut builder = BatchConfig::builder()
        .concurrency(cli.concurrency as usize)
        .viewport(cli.viewport_width, cli.viewport_height)
        .device_scale_factor(cli.scale)
        .max_strip_height(cli.max_strip_height)
        .capture_mode(cli.mode.into())
        .strip_policy(cli.strip_policy.into())
        .page_encoding(encoding)
        .resolution_dpi(cli.dpi)
        .settle_delay_ms(cli.settle_ms)
        .network_idle_ms(cli.idle_ms)
        .navigation_timeout_secs(cli.timeout)
        .batch_timeout_secs(cli.batch_timeout)
        .overwrite(cli.force);

    if let Some(ref chrome) = cli.chrome {
        builder = builder.chrome_path(chrome);
    }
    if let Some(resolver) = resolver {
        builder = builder.route_resolver(resolver);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
