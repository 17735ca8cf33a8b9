//! Conversion worker: one document through render → stitch → paginate.
//!
//! A worker owns its document from admission to terminal state:
//!
//! ```text
//! Pending ─▶ (slot) ─▶ output exists? ──yes──▶ Skipped
//!                          │ no
//!                          ▼
//!              Rendering ─▶ Stitching ─▶ Paginating ─▶ Done
//!                  └────────────┴────────────┴──────▶ Failed
//! ```
//!
//! Failures never escape the worker: every error becomes
//! [`DocumentOutcome::Failed`] in the returned [`DocumentReport`].
//!
//! ## Resources
//!
//! * The admission slot is an owned semaphore permit. Blocking stages hold a
//!   clone of it, so a stage abandoned by cancellation still counts against
//!   the gate until its thread returns.
//! * The browser context lives inside the renderer call and is closed on
//!   every exit path.
//! * The PDF is written to a hidden temp file next to the output and renamed
//!   into place only after every page encoded. Dropping the temp file
//!   deletes it, so a failed or cancelled document leaves nothing behind.

use crate::config::BatchConfig;
use crate::error::DocumentError;
use crate::output::{DocumentOutcome, DocumentReport, DocumentState};
use crate::pipeline::input::InputDocument;
use crate::pipeline::render::PageRenderer;
use crate::pipeline::{paginate, stitch};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Shared, read-only state of every worker in a batch.
pub(crate) struct WorkerContext {
    pub config: BatchConfig,
    /// `None` when discovery found nothing to render.
    pub renderer: Option<Arc<dyn PageRenderer>>,
    pub gate: Arc<Semaphore>,
}

impl WorkerContext {
    fn notify(&self, doc: &InputDocument, state: DocumentState) {
        debug!("{}: {state}", doc.name());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_state_change(&doc.path, state);
        }
    }
}

/// Run one document to a terminal state.
///
/// `cancel` flips to `true` when the batch is cancelled; a worker still
/// waiting for a slot, or mid-pipeline, then finishes as
/// `Failed(Cancelled)`.
pub(crate) async fn run_worker(
    doc: InputDocument,
    ctx: Arc<WorkerContext>,
    mut cancel: watch::Receiver<bool>,
) -> DocumentReport {
    ctx.notify(&doc, DocumentState::Pending);

    // ── Admission ────────────────────────────────────────────────────────
    let permit = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => None,
        permit = Arc::clone(&ctx.gate).acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        return finish(&ctx, doc, DocumentOutcome::Failed(DocumentError::Cancelled), Instant::now());
    };
    let slot = Arc::new(permit);
    let started = Instant::now();

    // ── Pipeline ─────────────────────────────────────────────────────────
    let outcome = process(&doc, &ctx, &slot, cancel).await;
    drop(slot);

    finish(&ctx, doc, outcome, started)
}

async fn process(
    doc: &InputDocument,
    ctx: &WorkerContext,
    slot: &Arc<OwnedSemaphorePermit>,
    mut cancel: watch::Receiver<bool>,
) -> DocumentOutcome {
    let config = &ctx.config;

    if !config.overwrite {
        match tokio::fs::try_exists(&doc.output).await {
            Ok(true) => return DocumentOutcome::Skipped,
            Ok(false) => {}
            Err(e) => {
                return DocumentOutcome::Failed(DocumentError::OutputWrite {
                    path: doc.output.clone(),
                    detail: format!("cannot check for existing output: {e}"),
                })
            }
        }
    }
    let Some(renderer) = ctx.renderer.clone() else {
        return DocumentOutcome::Failed(DocumentError::Internal(
            "no renderer was started for this batch".into(),
        ));
    };

    info!("Converting {}", doc.name());
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&doc.path);
    }

    // ── Step 1: Render tiles ─────────────────────────────────────────────
    ctx.notify(doc, DocumentState::Rendering);
    let render_start = Instant::now();
    let tiles = {
        let doc = doc.clone();
        let held = Arc::clone(slot);
        let stage = blocking(move || {
            let _held = held;
            renderer.render(&doc)
        });
        match unless_cancelled(&mut cancel, stage).await {
            Ok(tiles) => tiles,
            Err(e) => return DocumentOutcome::Failed(e),
        }
    };
    let tile_count = tiles.len();
    debug!(
        "{}: {} tiles in {}ms",
        doc.name(),
        tile_count,
        render_start.elapsed().as_millis()
    );

    // ── Step 2: Plan strips ──────────────────────────────────────────────
    ctx.notify(doc, DocumentState::Stitching);
    let (max, policy) = (config.max_strip_height, config.strip_policy);
    let plans = match stitch::plan_strips(&tiles, max, policy) {
        Ok(plans) => plans,
        Err(e) => return DocumentOutcome::Failed(e),
    };
    if *cancel.borrow() {
        return DocumentOutcome::Failed(DocumentError::Cancelled);
    }
    let height_px: u32 = plans.iter().map(|p| p.height).sum();
    let pages = plans.len();
    debug!("{}: {pages} strips, {height_px}px total", doc.name());

    // ── Step 3: Compose, paginate and persist ────────────────────────────
    // Each strip is composed, encoded and dropped before the next one, so a
    // document holds one strip canvas at a time. Not raced against
    // cancellation: the write checks the flag itself right before the
    // rename, so the outcome always matches what is on disk.
    ctx.notify(doc, DocumentState::Paginating);
    let (encoding, dpi, overwrite) = (config.page_encoding, config.resolution_dpi, config.overwrite);
    let output = doc.output.clone();
    let held = Arc::clone(slot);
    let written = blocking(move || {
        let _held = held;
        let pdf = paginate::paginate(stitch::strips(&tiles, &plans), encoding, dpi)?;
        drop(tiles);
        write_atomic(&output, &pdf, overwrite, &cancel)
    })
    .await;

    match written {
        Ok(()) => DocumentOutcome::Converted {
            pages,
            tiles: tile_count,
            height_px,
        },
        Err(e) => DocumentOutcome::Failed(e),
    }
}

/// Emit the terminal event and build the report.
fn finish(
    ctx: &WorkerContext,
    doc: InputDocument,
    outcome: DocumentOutcome,
    started: Instant,
) -> DocumentReport {
    let duration_ms = started.elapsed().as_millis() as u64;
    let cb = ctx.config.progress_callback.as_ref();

    match &outcome {
        DocumentOutcome::Converted { pages, .. } => {
            info!(
                "Converted {} → {} ({pages} pages, {duration_ms}ms)",
                doc.name(),
                doc.output.display()
            );
            if let Some(cb) = cb {
                cb.on_document_complete(&doc.path, *pages);
            }
        }
        DocumentOutcome::Skipped => {
            info!("Skipping {}: {} exists", doc.name(), doc.output.display());
            if let Some(cb) = cb {
                cb.on_document_skipped(&doc.path, &doc.output);
            }
        }
        DocumentOutcome::Failed(e) => {
            warn!("Failed {}: {e}", doc.name());
            if let Some(cb) = cb {
                cb.on_document_error(&doc.path, &e.to_string());
            }
        }
    }
    ctx.notify(&doc, outcome.state());

    DocumentReport {
        input: doc.path,
        output: doc.output,
        outcome,
        duration_ms,
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run a blocking stage off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, DocumentError>
where
    F: FnOnce() -> Result<T, DocumentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocumentError::Internal(format!("worker task panicked: {e}")))?
}

/// Resolves once the batch is cancelled; never, if the handle is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Abandon `stage` as soon as the batch is cancelled.
///
/// The blocking thread behind an abandoned stage runs to completion; its
/// result is dropped.
async fn unless_cancelled<T>(
    cancel: &mut watch::Receiver<bool>,
    stage: impl Future<Output = Result<T, DocumentError>>,
) -> Result<T, DocumentError> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(DocumentError::Cancelled),
        result = stage => result,
    }
}

/// Write `bytes` to `output` through a temp file in the same directory.
fn write_atomic(
    output: &Path,
    bytes: &[u8],
    overwrite: bool,
    cancel: &watch::Receiver<bool>,
) -> Result<(), DocumentError> {
    let write_err = |detail: String| DocumentError::OutputWrite {
        path: output.to_path_buf(),
        detail,
    };
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".pdf.part")
        .tempfile_in(dir)
        .map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(bytes).map_err(|e| write_err(e.to_string()))?;
    tmp.as_file().sync_all().map_err(|e| write_err(e.to_string()))?;

    if *cancel.borrow() {
        return Err(DocumentError::Cancelled);
    }

    let persisted = if overwrite {
        tmp.persist(output).map(|_| ())
    } else {
        tmp.persist_noclobber(output).map(|_| ())
    };
    persisted.map_err(|e| write_err(e.error.to_string()))
}

/// Convert a single document with the given renderer.
///
/// Applies the same skip rule and atomic write as a batch worker.
pub async fn convert_file(
    input: impl AsRef<Path>,
    renderer: Arc<dyn PageRenderer>,
    config: &BatchConfig,
) -> DocumentReport {
    let ctx = Arc::new(WorkerContext {
        config: config.clone(),
        renderer: Some(renderer),
        gate: Arc::new(Semaphore::new(1)),
    });
    // The sender is dropped at once, so this worker can never be cancelled.
    let (_, cancel) = watch::channel(false);
    run_worker(InputDocument::new(input.as_ref()), ctx, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::render::ScreenshotTile;
    use image::{Rgb, RgbImage};

    struct SolidRenderer {
        heights: Vec<u32>,
    }

    impl PageRenderer for SolidRenderer {
        fn render(&self, _doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError> {
            Ok(self
                .heights
                .iter()
                .enumerate()
                .map(|(rank, &h)| ScreenshotTile {
                    rank,
                    image: RgbImage::from_pixel(4, h, Rgb([rank as u8, 0, 0])),
                })
                .collect())
        }
    }

    fn never_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.pdf");
        write_atomic(&out, b"%PDF-1.7", false, &never_cancelled()).unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"%PDF-1.7");
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn atomic_write_respects_existing_file_unless_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.pdf");
        std::fs::write(&out, "old").unwrap();

        let err = write_atomic(&out, b"new", false, &never_cancelled()).unwrap_err();
        assert!(matches!(err, DocumentError::OutputWrite { .. }));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "old");

        write_atomic(&out, b"new", true, &never_cancelled()).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "new");
    }

    #[test]
    fn cancelled_write_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.pdf");
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = write_atomic(&out, b"%PDF", false, &rx).unwrap_err();
        assert_eq!(err, DocumentError::Cancelled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn convert_file_writes_one_page_per_strip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("doc.html");
        std::fs::write(&input, "<p>hi</p>").unwrap();
        let config = BatchConfig::builder().max_strip_height(250).build().unwrap();
        let renderer = Arc::new(SolidRenderer {
            heights: vec![100, 100, 100, 40],
        });

        let report = convert_file(&input, renderer, &config).await;
        assert_eq!(
            report.outcome,
            DocumentOutcome::Converted {
                pages: 2,
                tiles: 4,
                height_px: 340
            }
        );
        assert!(dir.path().join("doc.pdf").exists());
    }

    #[tokio::test]
    async fn unreadable_output_location_fails_before_rendering() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl PageRenderer for Counting {
            fn render(&self, _doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Vec::new())
            }
        }

        // The output's parent is a regular file, so probing it errors with
        // ENOTDIR instead of answering "absent".
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("blocker");
        std::fs::write(&not_a_dir, "").unwrap();
        let renderer = Arc::new(Counting(Default::default()));

        let report = convert_file(not_a_dir.join("doc.html"), renderer.clone(), &BatchConfig::default()).await;
        match report.outcome {
            DocumentOutcome::Failed(DocumentError::OutputWrite { path, .. }) => {
                assert_eq!(path, not_a_dir.join("doc.pdf"));
            }
            other => panic!("expected an output error, got {other:?}"),
        }
        assert_eq!(renderer.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn render_error_fails_without_output() {
        struct Broken;
        impl PageRenderer for Broken {
            fn render(&self, _doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError> {
                Err(DocumentError::NavigationTimeout { secs: 30 })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("slow.html");
        std::fs::write(&input, "").unwrap();

        let report = convert_file(&input, Arc::new(Broken), &BatchConfig::default()).await;
        assert_eq!(
            report.outcome,
            DocumentOutcome::Failed(DocumentError::NavigationTimeout { secs: 30 })
        );
        assert!(!dir.path().join("slow.pdf").exists());
    }
}
