//! Streaming batch API: emit document reports as they complete.
//!
//! ## Why stream?
//!
//! Large batches take a long time. A stream lets callers show each result
//! the moment its worker finishes, drive a progress display, or stop early,
//! instead of waiting for [`crate::batch::BatchDriver::run`] to collect
//! every report.
//!
//! Reports arrive in completion order, not input order. The stream ends
//! after every document reached a terminal state and the shared browser was
//! shut down.

use crate::batch::{BatchDriver, CancelHandle};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::output::DocumentReport;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

/// Reports of a running batch, in completion order.
///
/// Dropping the stream before it ends cancels the unfinished documents.
pub struct ReportStream {
    inner: ReceiverStream<DocumentReport>,
    total: usize,
    cancel: CancelHandle,
    finished: bool,
}

impl ReportStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<DocumentReport>,
        total: usize,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            total,
            cancel,
            finished: false,
        }
    }

    /// Number of documents discovered; the stream yields exactly this many reports.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for ReportStream {
    type Item = DocumentReport;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.finished = true;
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl Drop for ReportStream {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}

/// Convert every document in `dir`, streaming reports as they complete.
///
/// # Returns
/// - `Ok(ReportStream)` — one [`DocumentReport`] per discovered document
/// - `Err(BatchError)` — fatal setup error (missing directory, browser launch)
///
/// # Example
/// ```rust,no_run
/// use html2pdf_strips::{convert_dir_stream, BatchConfig, DocumentOutcome};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut reports = convert_dir_stream("./reports", &BatchConfig::default()).await?;
/// while let Some(report) = reports.next().await {
///     match report.outcome {
///         DocumentOutcome::Converted { pages, .. } => {
///             println!("{} → {pages} pages", report.input.display())
///         }
///         DocumentOutcome::Skipped => println!("{} skipped", report.input.display()),
///         DocumentOutcome::Failed(e) => eprintln!("{}: {e}", report.input.display()),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_dir_stream(
    dir: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<ReportStream, BatchError> {
    BatchDriver::new(config.clone()).stream(dir).await
}
