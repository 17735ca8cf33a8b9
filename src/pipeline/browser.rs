//! Headless Chrome implementation of [`PageRenderer`].
//!
//! One browser process is shared by the whole batch. Every document gets its
//! own browser context (separate cookies, storage and request interception)
//! and a single tab inside it; both are torn down by [`TabSession`]'s `Drop`
//! on every exit path.
//!
//! Context disposal is a browser-level command, so the renderer keeps a
//! second CDP connection to the same browser endpoint for it.
//!
//! All calls block; the worker invokes [`ChromeRenderer::render`] from
//! `spawn_blocking`.

use crate::config::{BatchConfig, CaptureMode};
use crate::error::{BatchError, DocumentError};
use crate::pipeline::input::InputDocument;
use crate::pipeline::render::{
    crop_scrolled_tile, plan_tiles, slice_full_page, PageRenderer, ScreenshotTile,
};
use crate::resolver::{Resolution, RouteResolver};
use base64::Engine as _;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision, Tab};
use headless_chrome::browser::transport::Transport;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FulfillRequest, HeaderEntry};
use headless_chrome::protocol::cdp::{Network, Page, Target};
use headless_chrome::{Browser, LaunchOptions};
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often [`ChromeRenderer::load`] checks for network idle.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Keep the CDP connection open across long batches.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const METRICS_JS: &str = r#"JSON.stringify({
    height: Math.max(
        document.documentElement ? document.documentElement.scrollHeight : 0,
        document.body ? document.body.scrollHeight : 0
    ),
    width: window.innerWidth,
    viewport_height: window.innerHeight
})"#;

const READY_STATE_JS: &str = "JSON.stringify(document.readyState)";

/// Layout of the loaded document, in CSS pixels.
#[derive(Debug, Clone, Copy, Deserialize)]
struct PageMetrics {
    height: f64,
    width: f64,
    viewport_height: f64,
}

/// Requests a tab has sent and not yet seen finish.
///
/// Fed from the tab's `Network.*` events. Redirects reuse their request id,
/// so a redirected request stays in flight until its final hop ends.
#[derive(Debug)]
struct NetworkActivity {
    in_flight: HashSet<String>,
    last_change: Instant,
}

impl NetworkActivity {
    fn new(now: Instant) -> Self {
        Self {
            in_flight: HashSet::new(),
            last_change: now,
        }
    }

    fn started(&mut self, request_id: &str, now: Instant) {
        self.in_flight.insert(request_id.to_string());
        self.last_change = now;
    }

    fn ended(&mut self, request_id: &str, now: Instant) {
        if self.in_flight.remove(request_id) {
            self.last_change = now;
        }
    }

    /// Nothing in flight, and nothing started or ended within `window`.
    fn is_idle(&self, now: Instant, window: Duration) -> bool {
        self.in_flight.is_empty() && now.saturating_duration_since(self.last_change) >= window
    }

    fn on_event(&mut self, event: &Event, now: Instant) {
        match event {
            Event::NetworkRequestWillBeSent(e) => self.started(&e.params.request_id, now),
            Event::NetworkLoadingFinished(e) => self.ended(&e.params.request_id, now),
            Event::NetworkLoadingFailed(e) => self.ended(&e.params.request_id, now),
            _ => {}
        }
    }
}

/// Renders documents in a shared headless Chrome.
pub struct ChromeRenderer {
    browser: Browser,
    /// Browser-level connection for commands a page session may not send.
    control: Transport,
    viewport_width: u32,
    viewport_height: u32,
    device_scale_factor: f64,
    capture_mode: CaptureMode,
    navigation_timeout: Duration,
    network_idle: Duration,
    settle_delay: Duration,
    resolver: Option<Arc<dyn RouteResolver>>,
}

impl ChromeRenderer {
    /// Start the shared browser.
    pub fn launch(config: &BatchConfig) -> Result<Self, BatchError> {
        let scale_flag = format!("--force-device-scale-factor={}", config.device_scale_factor);
        let args = vec![OsStr::new(&scale_flag), OsStr::new("--hide-scrollbars")];

        let options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport_width, config.viewport_height)))
            .path(config.chrome_path.clone())
            .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
            .args(args)
            .build()
            .map_err(|e| BatchError::BrowserLaunch(format!("invalid launch options: {e}")))?;

        let browser = Browser::new(options).map_err(|e| BatchError::BrowserLaunch(e.to_string()))?;
        let ws_url = url::Url::parse(&browser.get_ws_url())
            .map_err(|e| BatchError::BrowserLaunch(format!("bad DevTools endpoint: {e}")))?;
        let control = Transport::new(ws_url, browser.get_process_id(), BROWSER_IDLE_TIMEOUT, None)
            .map_err(|e| BatchError::BrowserLaunch(format!("cannot open control connection: {e}")))?;
        debug!(
            "Chrome launched ({}x{} @{}x)",
            config.viewport_width, config.viewport_height, config.device_scale_factor
        );

        Ok(Self {
            browser,
            control,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            device_scale_factor: config.device_scale_factor,
            capture_mode: config.capture_mode,
            navigation_timeout: config.navigation_timeout(),
            network_idle: config.network_idle(),
            settle_delay: config.settle_delay(),
            resolver: config.route_resolver.clone(),
        })
    }

    fn open_session(&self) -> Result<TabSession<'_>, DocumentError> {
        let context = self
            .browser
            .new_context()
            .map_err(|e| DocumentError::Navigation(format!("cannot create browser context: {e}")))?;
        let context_id = context.get_id().to_string();
        let tab = match context.new_tab() {
            Ok(tab) => tab,
            Err(e) => {
                dispose_context(&self.control, &context_id);
                return Err(DocumentError::Navigation(format!("cannot open tab: {e}")));
            }
        };
        tab.set_default_timeout(self.navigation_timeout);

        let session = TabSession {
            control: &self.control,
            context_id,
            tab,
            activity: Arc::new(Mutex::new(NetworkActivity::new(Instant::now()))),
        };
        session.track_network()?;
        if let Some(resolver) = &self.resolver {
            session.intercept(Arc::clone(resolver))?;
        }
        Ok(session)
    }

    /// Navigate and block until the document is complete and no request has
    /// been in flight for the idle window.
    fn load(&self, session: &TabSession<'_>, url: &str) -> Result<(), DocumentError> {
        let tab = &session.tab;
        let started = Instant::now();
        let timed_out = || DocumentError::NavigationTimeout {
            secs: self.navigation_timeout.as_secs(),
        };

        let navigated = tab.navigate_to(url).and_then(|t| t.wait_until_navigated());
        if let Err(e) = navigated {
            return Err(if started.elapsed() >= self.navigation_timeout {
                timed_out()
            } else {
                DocumentError::Navigation(e.to_string())
            });
        }

        loop {
            let ready_state: String = eval_json(tab, READY_STATE_JS)?;
            if ready_state == "complete" && session.network_idle(self.network_idle) {
                debug!("Network idle after {:?}", started.elapsed());
                return Ok(());
            }
            if started.elapsed() >= self.navigation_timeout {
                return Err(timed_out());
            }
            std::thread::sleep(IDLE_POLL);
        }
    }

    fn capture_scrolled(
        &self,
        tab: &Tab,
        metrics: PageMetrics,
        total: u32,
    ) -> Result<Vec<ScreenshotTile>, DocumentError> {
        let viewport = css_px(metrics.viewport_height).clamp(1, self.viewport_height.max(1));
        let spans = plan_tiles(total, viewport);
        debug!("Scroll capture: {} tiles of {viewport}px", spans.len());

        let mut tiles = Vec::with_capacity(spans.len());
        for span in spans {
            let scroll_js = format!("window.scrollTo(0, {}); window.scrollY", span.offset);
            let scroll_y = tab
                .evaluate(&scroll_js, false)
                .map_err(|e| DocumentError::Script(e.to_string()))?
                .value
                .and_then(|v| v.as_f64())
                .ok_or_else(|| DocumentError::Script("scrollY was not a number".into()))?;
            std::thread::sleep(self.settle_delay);

            let capture = capture_png(tab, None, false)?;
            let scale = f64::from(capture.height()) / f64::from(viewport);
            tiles.push(crop_scrolled_tile(&capture, span, css_px(scroll_y), scale)?);
        }
        Ok(tiles)
    }

    fn capture_full_page(
        &self,
        tab: &Tab,
        metrics: PageMetrics,
        total: u32,
    ) -> Result<Vec<ScreenshotTile>, DocumentError> {
        tab.evaluate("window.scrollTo(0, 0)", false)
            .map_err(|e| DocumentError::Script(e.to_string()))?;
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: metrics.width,
            height: f64::from(total),
            scale: 1.0,
        };
        let page = capture_png(tab, Some(clip), true)?;
        let scale = f64::from(page.height()) / f64::from(total);
        let viewport = css_px(metrics.viewport_height).clamp(1, self.viewport_height.max(1));
        debug!(
            "Full-page capture: {}x{} px, slicing at {viewport}px",
            page.width(),
            page.height()
        );
        slice_full_page(&page, &plan_tiles(total, viewport), scale)
    }
}

impl PageRenderer for ChromeRenderer {
    fn render(&self, doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError> {
        let url = doc.file_url()?;
        let session = self.open_session()?;
        self.load(&session, &url)?;

        let metrics: PageMetrics = eval_json(&session.tab, METRICS_JS)?;
        let total = css_px(metrics.height);
        if total == 0 {
            return Err(DocumentError::EmptyPage);
        }
        if css_px(metrics.width) != self.viewport_width {
            debug!(
                "{}: viewport is {}px wide, configured {}px",
                doc.name(),
                metrics.width,
                self.viewport_width
            );
        }
        debug!(
            "{}: {total}px tall at scale {}",
            doc.name(),
            self.device_scale_factor
        );

        match self.capture_mode {
            CaptureMode::Scroll => self.capture_scrolled(&session.tab, metrics, total),
            CaptureMode::FullPage => self.capture_full_page(&session.tab, metrics, total),
        }
    }
}

impl Drop for ChromeRenderer {
    fn drop(&mut self) {
        self.control.shutdown();
    }
}

// ── Per-document session ─────────────────────────────────────────────────

/// A tab inside its own browser context; disposes the context on drop.
struct TabSession<'a> {
    control: &'a Transport,
    context_id: String,
    tab: Arc<Tab>,
    activity: Arc<Mutex<NetworkActivity>>,
}

impl TabSession<'_> {
    /// Start following the tab's requests. Must run before navigation so the
    /// document request itself is seen.
    fn track_network(&self) -> Result<(), DocumentError> {
        self.tab
            .call_method(Network::Enable {
                max_total_buffer_size: None,
                max_resource_buffer_size: None,
                max_post_data_size: None,
                report_direct_socket_traffic: None,
                enable_durable_messages: None,
            })
            .map_err(|e| DocumentError::Navigation(format!("cannot enable network events: {e}")))?;

        let activity = Arc::clone(&self.activity);
        self.tab
            .add_event_listener(Arc::new(move |event: &Event| {
                if let Ok(mut activity) = activity.lock() {
                    activity.on_event(event, Instant::now());
                }
            }))
            .map_err(|e| DocumentError::Navigation(format!("cannot follow network events: {e}")))?;
        Ok(())
    }

    fn network_idle(&self, window: Duration) -> bool {
        self.activity
            .lock()
            .map(|a| a.is_idle(Instant::now(), window))
            .unwrap_or(false)
    }

    fn intercept(&self, resolver: Arc<dyn RouteResolver>) -> Result<(), DocumentError> {
        self.tab
            .enable_fetch(None, Some(false))
            .map_err(|e| DocumentError::Navigation(format!("cannot enable request interception: {e}")))?;

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
            move |_transport, _session_id, event: RequestPausedEvent| {
                let request_id = event.params.request_id.clone();
                match resolver.resolve(&event.params.request.url) {
                    Resolution::PassThrough => RequestPausedDecision::Continue(None),
                    Resolution::Serve { body, mime } => {
                        debug!("Serving {} from cache", event.params.request.url);
                        RequestPausedDecision::Fulfill(FulfillRequest {
                            request_id,
                            response_code: 200,
                            response_headers: Some(vec![
                                HeaderEntry {
                                    name: "Content-Type".into(),
                                    value: mime,
                                },
                                HeaderEntry {
                                    name: "Access-Control-Allow-Origin".into(),
                                    value: "*".into(),
                                },
                            ]),
                            binary_response_headers: None,
                            body: Some(base64::engine::general_purpose::STANDARD.encode(&body)),
                            response_phrase: None,
                        })
                    }
                }
            },
        );

        self.tab
            .enable_request_interception(interceptor)
            .map_err(|e| DocumentError::Navigation(format!("cannot enable request interception: {e}")))?;
        Ok(())
    }
}

impl Drop for TabSession<'_> {
    fn drop(&mut self) {
        // Disposing the context closes its tab too.
        if !dispose_context(self.control, &self.context_id) {
            if let Err(e) = self.tab.close(false) {
                warn!("Failed to close tab: {e}");
            }
        }
    }
}

fn dispose_context(control: &Transport, context_id: &str) -> bool {
    let dispose = Target::DisposeBrowserContext {
        browser_context_id: context_id.to_string(),
    };
    match control.call_method_on_browser(dispose) {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to dispose browser context {context_id}: {e}");
            false
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Evaluate an expression that returns `JSON.stringify(...)` and decode it.
fn eval_json<T: serde::de::DeserializeOwned>(tab: &Tab, js: &str) -> Result<T, DocumentError> {
    let value = tab
        .evaluate(js, false)
        .map_err(|e| DocumentError::Script(e.to_string()))?
        .value;
    let text = value
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or_else(|| DocumentError::Script(format!("expected a JSON string, got {value:?}")))?;
    serde_json::from_str(text).map_err(|e| DocumentError::Script(format!("bad script result: {e}")))
}

/// Screenshot as PNG. With `beyond_viewport`, `clip` may extend past the
/// visible area and Chrome lays out the whole region for the capture.
fn capture_png(
    tab: &Tab,
    clip: Option<Page::Viewport>,
    beyond_viewport: bool,
) -> Result<RgbImage, DocumentError> {
    let data = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(Page::CaptureScreenshotFormatOption::Png),
            quality: None,
            clip,
            from_surface: Some(true),
            capture_beyond_viewport: Some(beyond_viewport),
            optimize_for_speed: None,
        })
        .map_err(|e| DocumentError::Capture(e.to_string()))?
        .data;
    let png = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DocumentError::Capture(format!("screenshot is not base64: {e}")))?;
    let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
        .map_err(|e| DocumentError::Capture(format!("undecodable screenshot: {e}")))?;
    Ok(image.to_rgb8())
}

/// Layout values may be fractional; the page ends on the next whole pixel.
fn css_px(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 {
        v.ceil() as u32
    } else {
        0
    }
}
