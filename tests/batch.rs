//! Integration tests for the batch driver.
//!
//! These run the full discover → stitch → paginate → persist path with a
//! scripted [`PageRenderer`] in place of Chrome, so they need no browser and
//! run in CI. Tiles are 2 px wide to keep 200 000 px documents cheap.
//!
//! Real-browser coverage lives in `tests/chrome.rs`.

use futures::StreamExt;
use html2pdf_strips::pipeline::render::plan_tiles;
use html2pdf_strips::{
    BatchConfig, BatchDriver, BatchProgressCallback, BatchSummary, DocumentError,
    DocumentOutcome, DocumentState, InputDocument, PageRenderer, ScreenshotTile,
};
use image::{Rgb, RgbImage};
use lopdf::Document;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Renders every document as a page of `page_height` CSS px.
struct FakeRenderer {
    page_height: u32,
    viewport_height: u32,
    /// File stems whose navigation times out.
    failing: Vec<&'static str>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRenderer {
    fn new(page_height: u32, viewport_height: u32) -> Self {
        Self {
            page_height,
            viewport_height,
            failing: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, stem: &'static str) -> Self {
        self.failing.push(stem);
        self
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRenderer for FakeRenderer {
    fn render(&self, doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let stem = doc.path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if self.failing.contains(&stem) {
            return Err(DocumentError::NavigationTimeout { secs: 30 });
        }
        Ok(plan_tiles(self.page_height, self.viewport_height)
            .into_iter()
            .map(|span| ScreenshotTile {
                rank: span.rank,
                image: RgbImage::from_pixel(2, span.height, Rgb([span.rank as u8, 0, 0])),
            })
            .collect())
    }
}

fn html_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(dir.path().join(name), "<html><body>x</body></html>").unwrap();
    }
    dir
}

fn numbered(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("doc{i:02}.html")).collect()
}

fn config(viewport_height: u32) -> BatchConfig {
    BatchConfig::builder()
        .viewport(2, viewport_height)
        .build()
        .unwrap()
}

/// Image heights of each page, in page order.
fn page_heights(pdf: &Path) -> Vec<i64> {
    let doc = Document::load(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let page = doc.get_dictionary(page_id).unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
            let image_id = xobjects.get(b"Im0").unwrap().as_reference().unwrap();
            let image = doc.get_object(image_id).unwrap().as_stream().unwrap();
            image.dict.get(b"Height").unwrap().as_i64().unwrap()
        })
        .collect()
}

fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(".part"))
        .collect()
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn short_page_becomes_single_page_pdf() {
    let dir = html_dir(&["short.html"]);
    let renderer = Arc::new(FakeRenderer::new(500, 720));
    let report = BatchDriver::with_renderer(config(720), renderer.clone())
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 1);
    assert_eq!(
        report.documents[0].outcome,
        DocumentOutcome::Converted {
            pages: 1,
            tiles: 1,
            height_px: 500
        }
    );
    assert_eq!(page_heights(&dir.path().join("short.pdf")), vec![500]);
}

#[tokio::test]
async fn very_tall_page_is_split_into_strips() {
    let dir = html_dir(&["tall.html"]);
    let renderer = Arc::new(FakeRenderer::new(200_000, 1200));
    let report = BatchDriver::with_renderer(config(1200), renderer)
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(
        report.documents[0].outcome,
        DocumentOutcome::Converted {
            pages: 4,
            tiles: 167,
            height_px: 200_000
        }
    );
    let heights = page_heights(&dir.path().join("tall.pdf"));
    assert_eq!(heights, vec![65_000, 65_000, 65_000, 5_000]);
    assert_eq!(heights.iter().sum::<i64>(), 200_000);
    assert_eq!(report.summary.total_pages, 4);
}

#[tokio::test]
async fn whole_tile_policy_never_splits_a_tile() {
    let dir = html_dir(&["tall.html"]);
    let renderer = Arc::new(FakeRenderer::new(200_000, 1200));
    let config = BatchConfig::builder()
        .viewport(2, 1200)
        .strip_policy(html2pdf_strips::StripPolicy::WholeTiles)
        .build()
        .unwrap();
    let report = BatchDriver::with_renderer(config, renderer)
        .run(dir.path())
        .await
        .unwrap();

    let heights = page_heights(&dir.path().join("tall.pdf"));
    assert_eq!(report.summary.converted, 1);
    assert_eq!(heights.iter().sum::<i64>(), 200_000);
    assert!(heights.iter().all(|&h| h <= 65_000));
    // 54 full tiles fit under 65 000.
    assert_eq!(heights[0], 54 * 1200);
}

// ── Skip / failure isolation ─────────────────────────────────────────────────

#[tokio::test]
async fn existing_output_is_skipped_without_rendering() {
    let dir = html_dir(&["done.html", "new.html"]);
    std::fs::write(dir.path().join("done.pdf"), "keep me").unwrap();
    let renderer = Arc::new(FakeRenderer::new(100, 720));

    let report = BatchDriver::with_renderer(config(720), renderer.clone())
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(renderer.calls(), 1);
    assert_eq!(report.documents[0].outcome, DocumentOutcome::Skipped);
    assert_eq!(report.documents[0].input, dir.path().join("done.html"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("done.pdf")).unwrap(),
        "keep me"
    );
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.converted, 1);
}

#[tokio::test]
async fn overwrite_rerenders_existing_outputs() {
    let dir = html_dir(&["done.html"]);
    std::fs::write(dir.path().join("done.pdf"), "stale").unwrap();
    let renderer = Arc::new(FakeRenderer::new(100, 720));
    let config = BatchConfig::builder()
        .viewport(2, 720)
        .overwrite(true)
        .build()
        .unwrap();

    let report = BatchDriver::with_renderer(config, renderer.clone())
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(renderer.calls(), 1);
    assert_eq!(report.summary.converted, 1);
    assert_eq!(page_heights(&dir.path().join("done.pdf")), vec![100]);
}

#[tokio::test]
async fn failing_document_does_not_affect_others() {
    let dir = html_dir(&["a.html", "slow.html", "c.html"]);
    let renderer = Arc::new(FakeRenderer::new(300, 720).failing("slow"));

    let report = BatchDriver::with_renderer(config(720), renderer)
        .run(dir.path())
        .await
        .unwrap();

    let outcomes: Vec<_> = report.documents.iter().map(|d| d.outcome.state()).collect();
    assert_eq!(
        outcomes,
        vec![DocumentState::Done, DocumentState::Done, DocumentState::Failed]
    );
    assert_eq!(
        report.documents[2].outcome.error(),
        Some(&DocumentError::NavigationTimeout { secs: 30 })
    );
    assert!(!dir.path().join("slow.pdf").exists());
    assert!(dir.path().join("a.pdf").exists());
    assert!(dir.path().join("c.pdf").exists());
    assert!(leftover_temp_files(dir.path()).is_empty());
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test]
async fn second_run_skips_everything() {
    let names = numbered(3);
    let dir = html_dir(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720));
    let driver = BatchDriver::with_renderer(config(720), renderer.clone());

    let first = driver.run(dir.path()).await.unwrap();
    assert_eq!(first.summary.converted, 3);
    let bytes = std::fs::read(dir.path().join("doc00.pdf")).unwrap();

    let second = driver.run(dir.path()).await.unwrap();
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(renderer.calls(), 3);
    assert_eq!(std::fs::read(dir.path().join("doc00.pdf")).unwrap(), bytes);
}

#[tokio::test]
async fn non_matching_files_are_ignored() {
    let dir = html_dir(&["page.html", "notes.txt", "UPPER.HTML"]);
    std::fs::create_dir(dir.path().join("nested.html")).unwrap();
    let renderer = Arc::new(FakeRenderer::new(100, 720));

    let report = BatchDriver::with_renderer(config(720), renderer)
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(report.summary.total, 2);
    assert!(dir.path().join("UPPER.pdf").exists());
    assert!(!dir.path().join("notes.pdf").exists());
}

// ── Concurrency / cancellation ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_is_respected() {
    let names = numbered(10);
    let dir = html_dir(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720).delay(Duration::from_millis(50)));
    let config = BatchConfig::builder()
        .viewport(2, 720)
        .concurrency(4)
        .build()
        .unwrap();

    let report = BatchDriver::with_renderer(config, renderer.clone())
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(report.summary.converted, 10);
    let peak = renderer.peak.load(Ordering::SeqCst);
    assert!((1..=4).contains(&peak), "peak concurrency was {peak}");
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let names = numbered(3);
    let dir = html_dir(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720));
    let driver = BatchDriver::with_renderer(config(720), renderer.clone());
    driver.cancel_handle().cancel();

    let report = driver.run(dir.path()).await.unwrap();

    assert_eq!(report.documents.len(), 3);
    assert!(report
        .documents
        .iter()
        .all(|d| d.outcome == DocumentOutcome::Failed(DocumentError::Cancelled)));
    assert_eq!(renderer.calls(), 0);
    assert!(!dir.path().join("doc00.pdf").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_timeout_cancels_remaining_documents() {
    let names = numbered(8);
    let dir = html_dir(&names.iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720).delay(Duration::from_millis(400)));
    let config = BatchConfig::builder()
        .viewport(2, 720)
        .concurrency(1)
        .batch_timeout_secs(Some(1))
        .build()
        .unwrap();

    let report = BatchDriver::with_renderer(config, renderer)
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(report.documents.len(), 8);
    assert!(report.summary.failed >= 1);
    for doc in &report.documents {
        match &doc.outcome {
            DocumentOutcome::Converted { .. } => assert!(doc.output.exists()),
            DocumentOutcome::Failed(e) => {
                assert_eq!(e, &DocumentError::Cancelled);
                assert!(!doc.output.exists());
            }
            DocumentOutcome::Skipped => panic!("nothing should be skipped"),
        }
    }
    assert!(leftover_temp_files(dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_is_reusable_after_batch_timeout() {
    let first = html_dir(&numbered(4).iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720).delay(Duration::from_millis(700)));
    let config = BatchConfig::builder()
        .viewport(2, 720)
        .concurrency(1)
        .batch_timeout_secs(Some(1))
        .build()
        .unwrap();
    let driver = BatchDriver::with_renderer(config, renderer);

    let timed_out = driver.run(first.path()).await.unwrap();
    assert!(timed_out.summary.failed >= 1);

    let second = html_dir(&["fresh.html"]);
    let report = driver.run(second.path()).await.unwrap();
    assert_eq!(report.summary.converted, 1, "{report:#?}");
    assert!(second.path().join("fresh.pdf").exists());
}

#[tokio::test]
async fn driver_is_reusable_after_dropping_a_stream() {
    let first = html_dir(&numbered(5).iter().map(String::as_str).collect::<Vec<_>>());
    let renderer = Arc::new(FakeRenderer::new(100, 720).delay(Duration::from_millis(20)));
    let driver = BatchDriver::with_renderer(config(720), renderer);

    let mut stream = driver.stream(first.path()).await.unwrap();
    let batch = stream.cancel_handle();
    stream.next().await.unwrap();
    drop(stream);
    assert!(batch.is_cancelled());

    let second = html_dir(&["a.html", "b.html"]);
    let report = driver.run(second.path()).await.unwrap();
    assert_eq!(report.summary.converted, 2, "{report:#?}");
}

#[tokio::test]
async fn stream_handle_cancels_only_its_own_batch() {
    let renderer = Arc::new(FakeRenderer::new(100, 720));
    let driver = BatchDriver::with_renderer(config(720), renderer.clone());

    let first = html_dir(&["a.html", "b.html"]);
    let stream = driver.stream(first.path()).await.unwrap();
    let first_batch = stream.cancel_handle();
    let first_reports: Vec<_> = stream.collect().await;
    assert_eq!(first_reports.len(), 2);

    let second = html_dir(&["c.html"]);
    let mut stream = driver.stream(second.path()).await.unwrap();
    first_batch.cancel();
    let report = stream.next().await.unwrap();
    assert_eq!(report.outcome.state(), DocumentState::Done);
    assert!(stream.next().await.is_none());
}

// ── Streaming / progress ─────────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_one_report_per_document() {
    let dir = html_dir(&["a.html", "b.html", "c.html"]);
    std::fs::write(dir.path().join("b.pdf"), "").unwrap();
    let renderer = Arc::new(FakeRenderer::new(100, 720));

    let mut stream = BatchDriver::with_renderer(config(720), renderer)
        .stream(dir.path())
        .await
        .unwrap();
    assert_eq!(stream.total(), 3);

    let mut seen = Vec::new();
    while let Some(report) = stream.next().await {
        assert!(report.outcome.state().is_terminal());
        seen.push(report.input.file_name().unwrap().to_string_lossy().into_owned());
    }
    seen.sort();
    assert_eq!(seen, vec!["a.html", "b.html", "c.html"]);
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
    states: Mutex<HashMap<PathBuf, Vec<DocumentState>>>,
    summary: Mutex<Option<BatchSummary>>,
}

impl BatchProgressCallback for Recorder {
    fn on_document_start(&self, _input: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_state_change(&self, input: &Path, state: DocumentState) {
        self.states
            .lock()
            .unwrap()
            .entry(input.to_path_buf())
            .or_default()
            .push(state);
    }
    fn on_document_skipped(&self, _input: &Path, _output: &Path) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_complete(&self, _input: &Path, _pages: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_document_error(&self, _input: &Path, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, summary: &BatchSummary) {
        *self.summary.lock().unwrap() = Some(summary.clone());
    }
}

#[tokio::test]
async fn progress_callback_sees_every_transition() {
    let dir = html_dir(&["ok.html", "old.html", "bad.html"]);
    std::fs::write(dir.path().join("old.pdf"), "").unwrap();
    let recorder = Arc::new(Recorder::default());
    let config = BatchConfig::builder()
        .viewport(2, 720)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let renderer = Arc::new(FakeRenderer::new(100, 720).failing("bad"));

    BatchDriver::with_renderer(config, renderer)
        .run(dir.path())
        .await
        .unwrap();

    assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.skipped.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);

    let states = recorder.states.lock().unwrap();
    assert_eq!(
        states[&dir.path().join("ok.html")],
        vec![
            DocumentState::Pending,
            DocumentState::Rendering,
            DocumentState::Stitching,
            DocumentState::Paginating,
            DocumentState::Done,
        ]
    );
    assert_eq!(
        states[&dir.path().join("old.html")],
        vec![DocumentState::Pending, DocumentState::Skipped]
    );
    assert_eq!(
        states[&dir.path().join("bad.html")],
        vec![
            DocumentState::Pending,
            DocumentState::Rendering,
            DocumentState::Failed
        ]
    );

    let summary = recorder.summary.lock().unwrap().clone().unwrap();
    assert_eq!((summary.converted, summary.skipped, summary.failed), (1, 1, 1));
}
