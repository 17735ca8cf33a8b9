//! Result types: per-document outcomes and the aggregated batch report.

use crate::error::DocumentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pipeline position of one document.
///
/// ```text
/// Pending ─▶ Rendering ─▶ Stitching ─▶ Paginating ─▶ Done
///    │            └────────────┴────────────┴──────▶ Failed
///    └─▶ Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentState {
    Pending,
    Rendering,
    Stitching,
    Paginating,
    Done,
    Skipped,
    Failed,
}

impl DocumentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Rendering => "rendering",
            Self::Stitching => "stitching",
            Self::Paginating => "paginating",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal result of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentOutcome {
    /// The PDF was written.
    Converted {
        /// PDF pages (= strips).
        pages: usize,
        /// Captured tiles.
        tiles: usize,
        /// Full stitched height in device pixels.
        height_px: u32,
    },
    /// The output already existed; nothing was rendered.
    Skipped,
    /// The document failed; no output file was left behind.
    Failed(DocumentError),
}

impl DocumentOutcome {
    pub fn state(&self) -> DocumentState {
        match self {
            Self::Converted { .. } => DocumentState::Done,
            Self::Skipped => DocumentState::Skipped,
            Self::Failed(_) => DocumentState::Failed,
        }
    }

    pub fn error(&self) -> Option<&DocumentError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of one document, attributed to its input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: DocumentOutcome,
    /// Wall-clock time from acquiring a slot to the terminal state.
    pub duration_ms: u64,
}

/// Aggregate counts for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_pages: usize,
    pub total_duration_ms: u64,
}

impl BatchSummary {
    pub fn from_reports(reports: &[DocumentReport], total_duration_ms: u64) -> Self {
        let mut summary = Self {
            total: reports.len(),
            total_duration_ms,
            ..Self::default()
        };
        for r in reports {
            match &r.outcome {
                DocumentOutcome::Converted { pages, .. } => {
                    summary.converted += 1;
                    summary.total_pages += pages;
                }
                DocumentOutcome::Skipped => summary.skipped += 1,
                DocumentOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Everything a finished batch produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// One report per discovered document, sorted by input path.
    pub documents: Vec<DocumentReport>,
    pub summary: BatchSummary,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents
            .iter()
            .filter(|d| matches!(d.outcome, DocumentOutcome::Failed(_)))
    }
}
