//! # html2pdf-strips
//!
//! Batch-convert long, script-rendered HTML documents into multi-page PDFs
//! through headless Chrome.
//!
//! ## Why this crate?
//!
//! Printing a page to PDF re-lays it out for paper: charts shrink, sticky
//! headers repeat, diagrams drawn by scripts after load go missing. This
//! crate instead captures the page exactly as a browser shows it, one
//! viewport at a time, and stacks the captures into tall raster strips.
//! Each strip becomes one PDF page, so a 200 000 px dashboard turns into a
//! handful of pages with every pixel row kept exactly once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! <dir>/*.html
//!  │
//!  ├─ 1. Discover  list inputs, skip those whose <name>.pdf exists
//!  ├─ 2. Render    headless Chrome, one context per document (spawn_blocking)
//!  ├─ 3. Stitch    stack tiles, cut into strips ≤ max_strip_height
//!  ├─ 4. Paginate  one image page per strip, merged in order (lopdf)
//!  └─ 5. Persist   temp file + rename, so outputs are all-or-nothing
//! ```
//!
//! At most `concurrency` documents hold a browser context at once; one
//! failing document never affects the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use html2pdf_strips::{convert_dir, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder().concurrency(4).viewport(1280, 720).build()?;
//!     let report = convert_dir("./exports", &config).await?;
//!     eprintln!(
//!         "{} converted, {} skipped, {} failed",
//!         report.summary.converted, report.summary.skipped, report.summary.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `html2pdf` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! html2pdf-strips = { version = "0.5", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{convert_dir, convert_dir_sync, BatchDriver, CancelHandle};
pub use config::{BatchConfig, BatchConfigBuilder, CaptureMode, PageEncoding, StripPolicy};
pub use convert::convert_file;
pub use error::{BatchError, DocumentError};
pub use output::{BatchReport, BatchSummary, DocumentOutcome, DocumentReport, DocumentState};
pub use pipeline::browser::ChromeRenderer;
pub use pipeline::input::InputDocument;
pub use pipeline::render::{PageRenderer, ScreenshotTile};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use resolver::{Resolution, RouteResolver, StaticResolver};
pub use stream::{convert_dir_stream, ReportStream};
