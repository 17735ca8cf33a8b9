//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! events as workers pick up, skip, finish or fail documents. The CLI turns
//! these into its progress bar and per-file console lines; the library
//! itself never prints.
//!
//! # Example
//!
//! ```rust
//! use html2pdf_strips::{BatchConfig, BatchProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, input: &Path, pages: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} → {pages} pages", input.display());
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchSummary, DocumentState};
use std::path::Path;
use std::sync::Arc;

/// Called by the batch driver and its workers.
///
/// Workers run concurrently, so every method may be called from several
/// threads at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after discovery, before any worker starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a worker holds a slot and starts rendering.
    fn on_document_start(&self, input: &Path) {
        let _ = input;
    }

    /// Called on every pipeline stage transition of a document.
    fn on_state_change(&self, input: &Path, state: DocumentState) {
        let _ = (input, state);
    }

    /// Called when the output already exists and the document is skipped.
    fn on_document_skipped(&self, input: &Path, output: &Path) {
        let _ = (input, output);
    }

    /// Called when the PDF was written.
    fn on_document_complete(&self, input: &Path, pages: usize) {
        let _ = (input, pages);
    }

    /// Called when the document failed; `error` is human-readable.
    fn on_document_error(&self, input: &Path, error: &str) {
        let _ = (input, error);
    }

    /// Called once after every document reached a terminal state.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        skips: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_document_start(&self, _input: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_skipped(&self, _input: &Path, _output: &Path) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _input: &Path, _pages: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _input: &Path, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3);
        cb.on_document_start(Path::new("a.html"));
        cb.on_state_change(Path::new("a.html"), DocumentState::Rendering);
        cb.on_document_complete(Path::new("a.html"), 2);
        cb.on_document_error(Path::new("b.html"), "timeout");
        cb.on_batch_complete(&BatchSummary::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_start(Path::new("a.html"));
        tracker.on_document_complete(Path::new("a.html"), 1);
        tracker.on_document_skipped(Path::new("b.html"), Path::new("b.pdf"));
        tracker.on_document_start(Path::new("c.html"));
        tracker.on_document_error(Path::new("c.html"), "navigation timed out");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skips.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
