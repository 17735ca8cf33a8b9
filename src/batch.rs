//! Batch driver: discover documents, share one browser, run bounded workers.
//!
//! ## Lifecycle
//!
//! ```text
//! discover ──▶ launch browser ──▶ spawn workers ──▶ join all ──▶ drop browser
//!  (fatal)     (fatal; only if      (≤ K hold a      (reports     (after every
//!               something to         slot at once)    stream out)  terminal state)
//!               render)
//! ```
//!
//! Setup failures return `Err(BatchError)` before any document is touched.
//! After that the driver never fails: every document yields exactly one
//! [`DocumentReport`], whatever happened to it.
//!
//! Use [`BatchDriver::run`] to wait for the whole batch, or
//! [`BatchDriver::stream`] to receive reports as documents finish.

use crate::config::BatchConfig;
use crate::convert::{run_worker, WorkerContext};
use crate::error::{BatchError, DocumentError};
use crate::output::{BatchReport, BatchSummary, DocumentOutcome, DocumentReport};
use crate::pipeline::browser::ChromeRenderer;
use crate::pipeline::input::{discover_documents, InputDocument};
use crate::pipeline::render::PageRenderer;
use crate::stream::ReportStream;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Cancels a batch.
///
/// Within a batch cancellation is sticky: documents still waiting for a slot,
/// and documents mid-pipeline, finish as `Failed(Cancelled)` and no new work
/// starts.
///
/// A handle from [`BatchDriver::cancel_handle`] targets the driver's latest
/// batch, or the next one if none has started yet. Every batch gets a fresh
/// channel, so a cancelled or timed-out batch never leaks into the next run.
/// A handle from [`ReportStream::cancel_handle`] only ever targets its own
/// batch.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    slot: Arc<Mutex<CancelSlot>>,
}

#[derive(Debug)]
struct CancelSlot {
    tx: Arc<watch::Sender<bool>>,
    /// A batch already runs on `tx`.
    started: bool,
}

impl CancelHandle {
    fn new() -> Self {
        Self::with_sender(Arc::new(watch::channel(false).0), false)
    }

    /// Handle bound to one running batch.
    pub(crate) fn for_batch(tx: Arc<watch::Sender<bool>>) -> Self {
        Self::with_sender(tx, true)
    }

    fn with_sender(tx: Arc<watch::Sender<bool>>, started: bool) -> Self {
        Self {
            slot: Arc::new(Mutex::new(CancelSlot { tx, started })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CancelSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channel for a batch that is about to start.
    ///
    /// A cancel requested before any batch started carries over; otherwise
    /// the new batch gets a clean channel.
    fn begin(&self) -> Arc<watch::Sender<bool>> {
        let mut slot = self.lock();
        if slot.started {
            slot.tx = Arc::new(watch::channel(false).0);
        }
        slot.started = true;
        Arc::clone(&slot.tx)
    }

    pub fn cancel(&self) {
        self.lock().tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock().tx.borrow()
    }
}

/// Runs batches with one configuration.
pub struct BatchDriver {
    config: BatchConfig,
    renderer: Option<Arc<dyn PageRenderer>>,
    cancel: CancelHandle,
}

impl BatchDriver {
    /// Driver that launches headless Chrome when a batch needs rendering.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            renderer: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Driver that renders through `renderer` instead of Chrome.
    pub fn with_renderer(config: BatchConfig, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Convert every document in `dir` and wait for all of them.
    ///
    /// Reports are sorted by input path.
    pub async fn run(&self, dir: impl AsRef<Path>) -> Result<BatchReport, BatchError> {
        let started = Instant::now();
        let mut stream = self.stream(dir).await?;
        let mut documents = Vec::with_capacity(stream.total());
        while let Some(report) = stream.next().await {
            documents.push(report);
        }
        documents.sort_by(|a, b| a.input.cmp(&b.input));

        let summary = BatchSummary::from_reports(&documents, started.elapsed().as_millis() as u64);
        Ok(BatchReport { documents, summary })
    }

    /// Start converting `dir` and return the reports as they complete.
    ///
    /// Dropping the stream cancels the documents of this batch that have not
    /// finished. The driver stays usable for later batches.
    pub async fn stream(&self, dir: impl AsRef<Path>) -> Result<ReportStream, BatchError> {
        let dir = dir.as_ref();
        let config = &self.config;

        // ── Step 1: Discover ─────────────────────────────────────────────
        let docs = discover_documents(dir, &config.input_extension)?;
        let pending = docs
            .iter()
            .filter(|d| config.overwrite || !d.output.exists())
            .count();
        info!(
            "Found {} documents in {} ({} to convert)",
            docs.len(),
            dir.display(),
            pending
        );

        // ── Step 2: Shared renderer ──────────────────────────────────────
        let renderer = match &self.renderer {
            Some(r) => Some(Arc::clone(r)),
            None if pending > 0 => Some(launch_chrome(config).await?),
            None => None,
        };

        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_start(docs.len());
        }

        // ── Step 3: Workers ──────────────────────────────────────────────
        let total = docs.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let ctx = Arc::new(WorkerContext {
            config: config.clone(),
            renderer,
            gate: Arc::new(Semaphore::new(config.concurrency)),
        });
        let timeout = config.batch_timeout_secs.map(Duration::from_secs);
        let cancel = self.cancel.begin();
        tokio::spawn(supervise(docs, ctx, Arc::clone(&cancel), tx, timeout));

        Ok(ReportStream::new(rx, total, CancelHandle::for_batch(cancel)))
    }
}

/// Run every worker to completion, forward reports, then release the browser.
async fn supervise(
    docs: Vec<InputDocument>,
    ctx: Arc<WorkerContext>,
    cancel: Arc<watch::Sender<bool>>,
    tx: mpsc::Sender<DocumentReport>,
    timeout: Option<Duration>,
) {
    let started = Instant::now();
    let timer = timeout.map(|limit| {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Batch timeout of {}s reached; cancelling", limit.as_secs());
            cancel.send_replace(true);
        })
    });

    let mut workers = JoinSet::new();
    for doc in docs {
        workers.spawn(guarded_worker(doc, Arc::clone(&ctx), cancel.subscribe()));
    }
    let renderer = ctx.renderer.clone();
    let callback = ctx.config.progress_callback.clone();
    drop(ctx);

    let mut reports = Vec::with_capacity(workers.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => {
                reports.push(report.clone());
                if tx.send(report).await.is_err() && !*cancel.borrow() {
                    debug!("Report stream dropped; cancelling remaining documents");
                    cancel.send_replace(true);
                }
            }
            Err(e) => warn!("Worker task ended abnormally: {e}"),
        }
    }
    if let Some(timer) = timer {
        timer.abort();
    }

    // Every worker is terminal; the browser can go.
    if let Some(renderer) = renderer {
        if let Err(e) = tokio::task::spawn_blocking(move || drop(renderer)).await {
            warn!("Renderer shutdown panicked: {e}");
        }
    }

    let summary = BatchSummary::from_reports(&reports, started.elapsed().as_millis() as u64);
    info!(
        "Batch complete: {} converted, {} skipped, {} failed in {}ms",
        summary.converted, summary.skipped, summary.failed, summary.total_duration_ms
    );
    if let Some(cb) = callback {
        cb.on_batch_complete(&summary);
    }
}

/// A worker whose panic is reported as a failure of its own document.
async fn guarded_worker(
    doc: InputDocument,
    ctx: Arc<WorkerContext>,
    cancel: watch::Receiver<bool>,
) -> DocumentReport {
    let (input, output) = (doc.path.clone(), doc.output.clone());
    AssertUnwindSafe(run_worker(doc, ctx, cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| DocumentReport {
            input,
            output,
            outcome: DocumentOutcome::Failed(DocumentError::Internal("worker panicked".into())),
            duration_ms: 0,
        })
}

async fn launch_chrome(config: &BatchConfig) -> Result<Arc<dyn PageRenderer>, BatchError> {
    let config = config.clone();
    let renderer = tokio::task::spawn_blocking(move || ChromeRenderer::launch(&config))
        .await
        .map_err(|e| BatchError::Internal(format!("Browser launch task panicked: {e}")))??;
    Ok(Arc::new(renderer))
}

/// Convert every document in `dir` with headless Chrome.
///
/// # Example
/// ```rust,no_run
/// use html2pdf_strips::{convert_dir, BatchConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let report = convert_dir("./reports", &BatchConfig::default()).await?;
/// for doc in report.failures() {
///     eprintln!("{}: {:?}", doc.input.display(), doc.outcome);
/// }
/// println!(
///     "{} converted, {} skipped, {} failed",
///     report.summary.converted, report.summary.skipped, report.summary.failed
/// );
/// # Ok(())
/// # }
/// ```
pub async fn convert_dir(
    dir: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<BatchReport, BatchError> {
    BatchDriver::new(config.clone()).run(dir).await
}

/// Synchronous wrapper around [`convert_dir`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_dir_sync(
    dir: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<BatchReport, BatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_dir(dir, config))
}
