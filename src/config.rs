//! Configuration types for batch HTML-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`BatchConfig`], built via
//! its [`BatchConfigBuilder`]. Parallelism, viewport geometry and raster size
//! limits live here rather than in process-wide constants, so two batches in
//! one process can run with different settings.

use crate::error::BatchError;
use crate::progress::ProgressCallback;
use crate::resolver::RouteResolver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Largest height the JPEG container can describe (16-bit field).
pub const JPEG_MAX_DIMENSION: u32 = 65535;

/// Configuration for a batch conversion.
///
/// Built via [`BatchConfig::builder()`] or using [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use html2pdf_strips::{BatchConfig, CaptureMode};
///
/// let config = BatchConfig::builder()
///     .concurrency(8)
///     .viewport(1440, 900)
///     .capture_mode(CaptureMode::FullPage)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_strip_height, 65_000);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Maximum number of documents converted at once. Default: 4.
    ///
    /// Each active document holds its own browsing context in the shared
    /// browser, plus every tile of its page in memory.
    pub concurrency: usize,

    /// Viewport width in CSS pixels. Default: 1280.
    pub viewport_width: u32,

    /// Viewport height in CSS pixels; the height of one scroll tile. Default: 720.
    pub viewport_height: u32,

    /// Device pixel ratio applied to the whole browser. Default: 1.0.
    ///
    /// Tiles are `viewport × scale` device pixels; page measurements stay in
    /// CSS pixels.
    pub device_scale_factor: f64,

    /// Hard ceiling on the pixel height of one strip (= one PDF page). Default: 65 000.
    pub max_strip_height: u32,

    /// How the full page height is captured. Default: [`CaptureMode::Scroll`].
    pub capture_mode: CaptureMode,

    /// How tiles are grouped into strips. Default: [`StripPolicy::RowExact`].
    pub strip_policy: StripPolicy,

    /// Compression used for each page image. Default: [`PageEncoding::Flate`].
    pub page_encoding: PageEncoding,

    /// Pixels per inch used to size PDF pages. Default: 72 (1 px = 1 pt).
    pub resolution_dpi: f32,

    /// Pause after each scroll so lazy content can paint. Default: 100 ms.
    pub settle_delay_ms: u64,

    /// Per-document navigation + network-idle deadline. Default: 30 s.
    pub navigation_timeout_secs: u64,

    /// Quiescence window: no new resource loads for this long counts as idle. Default: 500 ms.
    pub network_idle_ms: u64,

    /// Optional cut-off for the whole batch. Default: none.
    pub batch_timeout_secs: Option<u64>,

    /// Input file extension, matched case-insensitively. Default: "html".
    pub input_extension: String,

    /// Re-render documents whose PDF already exists. Default: false (skip them).
    pub overwrite: bool,

    /// Explicit Chrome/Chromium binary. If None, the driver auto-detects one.
    pub chrome_path: Option<PathBuf>,

    /// Serves cached dependency assets in place of network fetches.
    pub route_resolver: Option<Arc<dyn RouteResolver>>,

    /// Receives per-document lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            viewport_width: 1280,
            viewport_height: 720,
            device_scale_factor: 1.0,
            max_strip_height: 65_000,
            capture_mode: CaptureMode::default(),
            strip_policy: StripPolicy::default(),
            page_encoding: PageEncoding::default(),
            resolution_dpi: 72.0,
            settle_delay_ms: 100,
            navigation_timeout_secs: 30,
            network_idle_ms: 500,
            batch_timeout_secs: None,
            input_extension: "html".to_string(),
            overwrite: false,
            chrome_path: None,
            route_resolver: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("concurrency", &self.concurrency)
            .field("viewport_width", &self.viewport_width)
            .field("viewport_height", &self.viewport_height)
            .field("device_scale_factor", &self.device_scale_factor)
            .field("max_strip_height", &self.max_strip_height)
            .field("capture_mode", &self.capture_mode)
            .field("strip_policy", &self.strip_policy)
            .field("page_encoding", &self.page_encoding)
            .field("resolution_dpi", &self.resolution_dpi)
            .field("navigation_timeout_secs", &self.navigation_timeout_secs)
            .field("batch_timeout_secs", &self.batch_timeout_secs)
            .field("input_extension", &self.input_extension)
            .field("overwrite", &self.overwrite)
            .field("chrome_path", &self.chrome_path)
            .field(
                "route_resolver",
                &self.route_resolver.as_ref().map(|_| "<dyn RouteResolver>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn network_idle(&self) -> Duration {
        Duration::from_millis(self.network_idle_ms)
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport_width = width.max(1);
        self.config.viewport_height = height.max(1);
        self
    }

    pub fn device_scale_factor(mut self, scale: f64) -> Self {
        self.config.device_scale_factor = scale.clamp(0.25, 4.0);
        self
    }

    pub fn max_strip_height(mut self, px: u32) -> Self {
        self.config.max_strip_height = px.max(1);
        self
    }

    pub fn capture_mode(mut self, mode: CaptureMode) -> Self {
        self.config.capture_mode = mode;
        self
    }

    pub fn strip_policy(mut self, policy: StripPolicy) -> Self {
        self.config.strip_policy = policy;
        self
    }

    pub fn page_encoding(mut self, encoding: PageEncoding) -> Self {
        self.config.page_encoding = match encoding {
            PageEncoding::Jpeg { quality } => PageEncoding::Jpeg {
                quality: quality.clamp(1, 100),
            },
            other => other,
        };
        self
    }

    pub fn resolution_dpi(mut self, dpi: f32) -> Self {
        self.config.resolution_dpi = dpi;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn navigation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.navigation_timeout_secs = secs.max(1);
        self
    }

    pub fn network_idle_ms(mut self, ms: u64) -> Self {
        self.config.network_idle_ms = ms;
        self
    }

    pub fn batch_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.batch_timeout_secs = secs;
        self
    }

    pub fn input_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.input_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn route_resolver(mut self, resolver: Arc<dyn RouteResolver>) -> Self {
        self.config.route_resolver = Some(resolver);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if !(c.resolution_dpi.is_finite() && c.resolution_dpi > 0.0) {
            return Err(BatchError::InvalidConfig(format!(
                "Resolution must be a positive DPI, got {}",
                c.resolution_dpi
            )));
        }
        if matches!(c.page_encoding, PageEncoding::Jpeg { .. })
            && c.max_strip_height > JPEG_MAX_DIMENSION
        {
            return Err(BatchError::InvalidConfig(format!(
                "JPEG pages are limited to {JPEG_MAX_DIMENSION}px; max strip height is {}",
                c.max_strip_height
            )));
        }
        if c.input_extension.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Input extension must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where the full page is split into rows.
///
/// Both modes yield the same pixels for a static page. They differ on
/// lazy-loading content: `Scroll` triggers scroll-driven loaders tile by
/// tile, `FullPage` captures whatever was laid out at load time, in one
/// bitmap that Chrome itself may refuse past its texture size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Scroll one viewport at a time and capture each. (default)
    #[default]
    Scroll,
    /// Capture the whole document once and slice it by viewport rows afterwards.
    FullPage,
}

/// How the stacked tiles are cut into strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StripPolicy {
    /// Cut at exact multiples of the ceiling; a tile on a boundary is split
    /// across two strips. Yields `ceil(height / ceiling)` strips. (default)
    #[default]
    RowExact,
    /// Pack whole tiles greedily; a tile taller than the ceiling is an error.
    WholeTiles,
}

/// Compression of each page's image XObject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageEncoding {
    /// Lossless zlib (`/FlateDecode`). (default)
    #[default]
    Flate,
    /// Baseline JPEG (`/DCTDecode`) at the given quality, 1–100.
    Jpeg { quality: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = BatchConfig::default();
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_strip_height, 65_000);
        assert_eq!(c.capture_mode, CaptureMode::Scroll);
        assert_eq!(c.strip_policy, StripPolicy::RowExact);
        assert_eq!(c.input_extension, "html");
        assert!(!c.overwrite);
    }

    #[test]
    fn builder_clamps_values() {
        let c = BatchConfig::builder()
            .concurrency(0)
            .viewport(0, 0)
            .device_scale_factor(10.0)
            .page_encoding(PageEncoding::Jpeg { quality: 0 })
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!((c.viewport_width, c.viewport_height), (1, 1));
        assert_eq!(c.device_scale_factor, 4.0);
        assert_eq!(c.page_encoding, PageEncoding::Jpeg { quality: 1 });
    }

    #[test]
    fn jpeg_rejects_tall_strips() {
        let err = BatchConfig::builder()
            .page_encoding(PageEncoding::Jpeg { quality: 85 })
            .max_strip_height(70_000)
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn extension_strips_leading_dot() {
        let c = BatchConfig::builder().input_extension(".htm").build().unwrap();
        assert_eq!(c.input_extension, "htm");
    }

    #[test]
    fn invalid_dpi_rejected() {
        assert!(BatchConfig::builder().resolution_dpi(0.0).build().is_err());
        assert!(BatchConfig::builder().resolution_dpi(f32::NAN).build().is_err());
    }
}
