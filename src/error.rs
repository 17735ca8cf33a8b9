//! Error types for the html2pdf-strips library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Fatal**: the batch cannot start at all (input
//!   directory missing, asset cache could not be populated, browser would
//!   not launch). Returned as `Err(BatchError)` from the batch entry points
//!   before any document is processed.
//!
//! * [`DocumentError`] — **Non-fatal**: one document failed (navigation
//!   timeout, degenerate page, encode failure) but its siblings are
//!   unaffected. Stored inside [`crate::output::DocumentOutcome::Failed`]
//!   so the driver aggregates it instead of propagating it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the html2pdf-strips library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::DocumentReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input directory does not exist.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// Input path exists but is a file.
    #[error("Input path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// Directory listing failed (permissions, I/O error).
    #[error("Failed to list input directory '{path}': {source}")]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// The dependency cache could not be populated; no document is processed.
    #[error("Dependency cache setup failed: {0}")]
    AssetCache(#[from] asset_cache::AssetCacheError),

    /// The shared headless browser could not be started.
    #[error(
        "Failed to launch headless Chrome: {0}\n\n\
Install Chrome or Chromium, or point --chrome (HTML2PDF_CHROME) at its binary.\n"
    )]
    BrowserLaunch(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// Every variant renders as a human-readable cause; the owning report
/// carries the file name.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum DocumentError {
    // ── Render stage ──────────────────────────────────────────────────────
    /// The page did not reach network idle before the navigation timeout.
    #[error("navigation timed out after {secs}s")]
    NavigationTimeout { secs: u64 },

    /// Navigation failed outright (bad URL, crashed tab, closed browser).
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Evaluating a measurement or scroll script failed.
    #[error("script evaluation failed: {0}")]
    Script(String),

    /// The browser returned no usable bitmap.
    #[error("screenshot capture failed: {0}")]
    Capture(String),

    /// The rendered document has zero scrollable height (or no tiles).
    #[error("page rendered with zero height; nothing to capture")]
    EmptyPage,

    // ── Stitch stage ──────────────────────────────────────────────────────
    /// Tiles of one document must share a width.
    #[error("tile {rank} is {found}px wide, expected {expected}px")]
    TileWidthMismatch { rank: usize, expected: u32, found: u32 },

    /// A tile taller than the strip ceiling cannot be packed whole.
    #[error("tile {rank} is {height}px tall, above the {max}px strip ceiling")]
    OversizedTile { rank: usize, height: u32, max: u32 },

    /// Compositing a strip failed.
    #[error("stitching failed: {0}")]
    Stitch(String),

    // ── Paginate stage ────────────────────────────────────────────────────
    /// Encoding one strip as a PDF page failed; the whole document is dropped.
    #[error("encoding page {page} failed: {detail}")]
    Encode { page: usize, detail: String },

    /// Writing or renaming the finished PDF failed.
    #[error("failed to write '{path}': {detail}")]
    OutputWrite { path: PathBuf, detail: String },

    // ── Driver ────────────────────────────────────────────────────────────
    /// The batch was cancelled before this document finished.
    #[error("cancelled before completion")]
    Cancelled,

    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}
