//! Strip stitching: stack tiles vertically and cut the stack into strips no
//! taller than the raster ceiling.
//!
//! Stitching happens in two passes. [`plan_strips`] works on heights only and
//! decides, for every strip, which rows of which tiles land where; it is
//! cheap and fully testable without pixels. [`compose_strip`] then copies the
//! planned rows into one canvas per strip.
//!
//! ```text
//!  tiles            RowExact (max = 2.5 tiles)     WholeTiles
//!  ┌────┐ 0         ┌────┐                        ┌────┐
//!  ├────┤ 1         │ s0 │                        │ s0 │
//!  ├────┤ 2  ──▶    ├─ ─ ┤ ← tile 2 split         ├────┤
//!  ├────┤ 3         │ s1 │                        │ s1 │
//!  └────┘ 4         └────┘                        ├────┤
//!                                                 │ s2 │
//!                                                 └────┘
//! ```

use crate::config::StripPolicy;
use crate::error::DocumentError;
use crate::pipeline::render::ScreenshotTile;
use image::{imageops, GenericImage, RgbImage};
use tracing::debug;

/// A run of rows copied from one tile into one strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSlice {
    /// Index into the tile sequence.
    pub tile: usize,
    /// First source row inside the tile.
    pub src_top: u32,
    pub rows: u32,
    /// First destination row inside the strip.
    pub dest_top: u32,
}

/// Layout of one strip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripPlan {
    pub height: u32,
    pub slices: Vec<TileSlice>,
}

impl StripPlan {
    fn push(&mut self, tile: usize, src_top: u32, rows: u32) {
        self.slices.push(TileSlice {
            tile,
            src_top,
            rows,
            dest_top: self.height,
        });
        self.height += rows;
    }
}

/// Validate the tiles and lay them out into strips.
///
/// Strip heights always sum to the sum of tile heights, and concatenating
/// the strips top to bottom reproduces the stacked tiles row for row.
pub fn plan_strips(
    tiles: &[ScreenshotTile],
    max_strip_height: u32,
    policy: StripPolicy,
) -> Result<Vec<StripPlan>, DocumentError> {
    let first = tiles.first().ok_or(DocumentError::EmptyPage)?;
    let width = first.width();
    for (rank, tile) in tiles.iter().enumerate() {
        if tile.width() != width {
            return Err(DocumentError::TileWidthMismatch {
                rank,
                expected: width,
                found: tile.width(),
            });
        }
    }

    let heights: Vec<u32> = tiles.iter().map(ScreenshotTile::height).collect();
    let plans = match policy {
        StripPolicy::RowExact => plan_row_exact(&heights, max_strip_height),
        StripPolicy::WholeTiles => plan_whole_tiles(&heights, max_strip_height)?,
    };
    if plans.is_empty() || width == 0 {
        return Err(DocumentError::EmptyPage);
    }

    debug!(
        "Planned {} strips from {} tiles ({:?}, max {}px)",
        plans.len(),
        tiles.len(),
        policy,
        max_strip_height
    );
    Ok(plans)
}

/// Cut the stacked tiles at exact multiples of `max`.
pub fn plan_row_exact(heights: &[u32], max: u32) -> Vec<StripPlan> {
    let max = max.max(1);
    let mut plans = Vec::new();
    let mut current = StripPlan::default();

    for (tile, &height) in heights.iter().enumerate() {
        let mut src_top = 0;
        while src_top < height {
            let rows = (max - current.height).min(height - src_top);
            current.push(tile, src_top, rows);
            src_top += rows;
            if current.height == max {
                plans.push(std::mem::take(&mut current));
            }
        }
    }
    if current.height > 0 {
        plans.push(current);
    }
    plans
}

/// Greedy top-to-bottom packing of whole tiles.
pub fn plan_whole_tiles(heights: &[u32], max: u32) -> Result<Vec<StripPlan>, DocumentError> {
    let mut plans = Vec::new();
    let mut current = StripPlan::default();

    for (tile, &height) in heights.iter().enumerate() {
        if height > max {
            return Err(DocumentError::OversizedTile {
                rank: tile,
                height,
                max,
            });
        }
        if height == 0 {
            continue;
        }
        if current.height + height > max {
            plans.push(std::mem::take(&mut current));
        }
        current.push(tile, 0, height);
    }
    if current.height > 0 {
        plans.push(current);
    }
    Ok(plans)
}

/// Render one planned strip into a fresh canvas.
pub fn compose_strip(tiles: &[ScreenshotTile], plan: &StripPlan) -> Result<RgbImage, DocumentError> {
    let width = tiles.first().map(ScreenshotTile::width).ok_or(DocumentError::EmptyPage)?;
    let mut canvas = RgbImage::new(width, plan.height);

    for slice in &plan.slices {
        let tile = tiles.get(slice.tile).ok_or_else(|| {
            DocumentError::Stitch(format!("plan references missing tile {}", slice.tile))
        })?;
        let rows = imageops::crop_imm(&tile.image, 0, slice.src_top, width, slice.rows);
        canvas
            .copy_from(&*rows, 0, slice.dest_top)
            .map_err(|e| DocumentError::Stitch(format!("tile {}: {e}", slice.tile)))?;
    }
    Ok(canvas)
}

/// Compose planned strips one at a time, in order.
///
/// Nothing is composed until the iterator is advanced, so a consumer that
/// encodes and drops each strip holds at most one strip canvas at once.
pub fn strips<'a>(
    tiles: &'a [ScreenshotTile],
    plans: &'a [StripPlan],
) -> impl Iterator<Item = Result<RgbImage, DocumentError>> + 'a {
    plans.iter().map(move |plan| compose_strip(tiles, plan))
}
