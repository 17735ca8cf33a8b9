//! Pipeline stages for HTML-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the rendering backend can be swapped without
//! touching the raster stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ stitch ──▶ paginate
//! (.html)   (tiles)    (strips)   (PDF bytes)
//! ```
//!
//! 1. [`input`]    — discover documents and derive `<name>.pdf` outputs
//! 2. [`render`]   — the [`render::PageRenderer`] seam and tile geometry;
//!    [`browser`] drives headless Chrome behind it
//! 3. [`stitch`]   — stack tiles and cut them into height-bounded strips
//! 4. [`paginate`] — encode each strip as one page and merge in order

pub mod browser;
pub mod input;
pub mod paginate;
pub mod render;
pub mod stitch;
