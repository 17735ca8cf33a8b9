//! Page rendering seam and tile geometry.
//!
//! A [`PageRenderer`] turns one input document into an ordered list of
//! [`ScreenshotTile`]s. The production implementation drives headless Chrome
//! ([`crate::pipeline::browser::ChromeRenderer`]); tests plug in a
//! deterministic fake.
//!
//! ## Why blocking?
//!
//! The CDP driver is synchronous: every call parks the current thread until
//! Chrome answers. Renderers are therefore called from
//! `tokio::task::spawn_blocking`, the same way the worker moves every other
//! CPU- or driver-bound stage off the async executor.
//!
//! ## Coordinates
//!
//! Page measurements are in CSS pixels; tiles are in device pixels
//! (`css × device_scale_factor`). Row boundaries are computed once, in CSS
//! space, and converted with [`device_rows`] so adjacent tiles share their
//! boundary row exactly: no row is duplicated or dropped at any scale.

use crate::error::DocumentError;
use crate::pipeline::input::InputDocument;
use image::{imageops, RgbImage};

/// One captured band of the page, in top-to-bottom order.
#[derive(Debug, Clone)]
pub struct ScreenshotTile {
    /// 0-based position in the capture sequence.
    pub rank: usize,
    pub image: RgbImage,
}

impl ScreenshotTile {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Renders a document into tiles.
///
/// Implementations must return tiles ordered by rank, all of one width, that
/// together cover every row of the rendered page exactly once. An error
/// fails that document only.
pub trait PageRenderer: Send + Sync + 'static {
    fn render(&self, doc: &InputDocument) -> Result<Vec<ScreenshotTile>, DocumentError>;
}

// ── Tile geometry ────────────────────────────────────────────────────────

/// Vertical extent of one tile in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpan {
    pub rank: usize,
    /// Distance from the top of the document.
    pub offset: u32,
    pub height: u32,
}

impl TileSpan {
    pub fn end(&self) -> u32 {
        self.offset + self.height
    }
}

/// Split a page of `total_height` into viewport-high tiles.
///
/// Yields `ceil(total_height / viewport_height)` spans; every span is
/// `viewport_height` tall except possibly the last, which holds the
/// remainder. A zero-height page yields no spans.
pub fn plan_tiles(total_height: u32, viewport_height: u32) -> Vec<TileSpan> {
    let v = viewport_height.max(1);
    let count = total_height.div_ceil(v);
    (0..count)
        .map(|i| {
            let offset = i * v;
            TileSpan {
                rank: i as usize,
                offset,
                height: v.min(total_height - offset),
            }
        })
        .collect()
}

/// CSS pixel row → device pixel row.
pub fn device_rows(css: u32, scale: f64) -> u32 {
    (f64::from(css) * scale).round() as u32
}

/// Cut one tile out of a viewport capture taken at `scroll_y`.
///
/// The browser clamps the scroll position at the bottom of the document, so
/// the last tile is usually captured from a viewport that starts above the
/// requested offset; its rows sit further down in the capture. `scale` is the
/// measured device-pixel ratio of the capture.
pub fn crop_scrolled_tile(
    capture: &RgbImage,
    span: TileSpan,
    scroll_y: u32,
    scale: f64,
) -> Result<ScreenshotTile, DocumentError> {
    let top = device_rows(span.offset, scale);
    let bottom = device_rows(span.end(), scale);
    let start = top.saturating_sub(device_rows(scroll_y, scale));
    let rows = bottom - top;

    if rows == 0 || start + rows > capture.height() {
        return Err(DocumentError::Capture(format!(
            "tile {} needs rows {}..{} of a {}px capture (scrolled to {}px)",
            span.rank,
            start,
            start + rows,
            capture.height(),
            scroll_y
        )));
    }

    let image = imageops::crop_imm(capture, 0, start, capture.width(), rows).to_image();
    Ok(ScreenshotTile {
        rank: span.rank,
        image,
    })
}

/// Slice a single full-page capture into tiles at the given CSS geometry.
///
/// Produces exactly the tiles a scroll capture of a static page would.
pub fn slice_full_page(
    page: &RgbImage,
    spans: &[TileSpan],
    scale: f64,
) -> Result<Vec<ScreenshotTile>, DocumentError> {
    spans
        .iter()
        .map(|&span| crop_scrolled_tile(page, span, 0, scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Each row painted with its own index so slicing errors are visible.
    fn striped(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |_, y| {
            Rgb([(y % 256) as u8, ((y / 256) % 256) as u8, 7])
        })
    }

    #[test]
    fn single_viewport_page_is_one_tile() {
        let spans = plan_tiles(1200, 1200);
        assert_eq!(
            spans,
            vec![TileSpan {
                rank: 0,
                offset: 0,
                height: 1200
            }]
        );
    }

    #[test]
    fn tall_page_tile_count_and_remainder() {
        let spans = plan_tiles(200_000, 1200);
        assert_eq!(spans.len(), 167);
        let last = spans.last().unwrap();
        assert_eq!(last.height, 200_000 - 1200 * 166);
        assert_eq!(last.end(), 200_000);
        assert_eq!(spans.iter().map(|s| s.height).sum::<u32>(), 200_000);
    }

    #[test]
    fn exact_multiple_has_full_last_tile() {
        let spans = plan_tiles(3600, 1200);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].height, 1200);
    }

    #[test]
    fn zero_height_has_no_tiles() {
        assert!(plan_tiles(0, 720).is_empty());
    }

    #[test]
    fn spans_are_contiguous() {
        let spans = plan_tiles(5_001, 700);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
    }

    #[test]
    fn device_rows_round_consistently() {
        assert_eq!(device_rows(720, 1.0), 720);
        assert_eq!(device_rows(720, 2.0), 1440);
        assert_eq!(device_rows(333, 1.5), 500);
    }

    #[test]
    fn last_tile_is_cropped_from_clamped_scroll() {
        // Page 2500 tall, viewport 1000: last tile wants rows 2000..2500 but
        // the browser can only scroll to 1500.
        let page = striped(4, 2500);
        let capture = imageops::crop_imm(&page, 0, 1500, 4, 1000).to_image();
        let span = plan_tiles(2500, 1000)[2];

        let tile = crop_scrolled_tile(&capture, span, 1500, 1.0).unwrap();
        assert_eq!(tile.height(), 500);
        assert_eq!(tile.image.get_pixel(0, 0), page.get_pixel(0, 2000));
        assert_eq!(tile.image.get_pixel(0, 499), page.get_pixel(0, 2499));
    }

    #[test]
    fn crop_outside_capture_is_an_error() {
        let capture = striped(4, 100);
        let span = TileSpan {
            rank: 3,
            offset: 0,
            height: 200,
        };
        let err = crop_scrolled_tile(&capture, span, 0, 1.0).unwrap_err();
        assert!(matches!(err, DocumentError::Capture(_)));
    }

    #[test]
    fn full_page_slices_match_scroll_tiles() {
        let scale = 2.0;
        let page = striped(8, device_rows(2500, scale));
        let spans = plan_tiles(2500, 1000);
        let tiles = slice_full_page(&page, &spans, scale).unwrap();

        assert_eq!(tiles.len(), 3);
        assert_eq!(
            tiles.iter().map(|t| t.height()).sum::<u32>(),
            page.height()
        );
        // Middle tile equals a viewport capture scrolled to its offset.
        let capture = imageops::crop_imm(&page, 0, 2000, 8, 2000).to_image();
        let scrolled = crop_scrolled_tile(&capture, spans[1], 1000, scale).unwrap();
        assert_eq!(scrolled.image, tiles[1].image);
    }
}
