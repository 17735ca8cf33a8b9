//! Page pagination: one PDF page per strip, merged by pure append.
//!
//! Each strip becomes a [`PageFragment`]: a single image XObject plus the
//! page geometry that displays it edge to edge. [`PdfAssembler`] appends
//! fragments in order and writes the page tree once every strip encoded.
//! No fragment is written to disk on its own, so a failed encode leaves
//! nothing behind.
//!
//! ## Page size
//!
//! A page measures `px × 72 / dpi` points. Readers cap a page side at
//! 14 400 units; taller strips (65 000 px at 72 dpi is 65 000 pt) get a
//! `/UserUnit` so the nominal size stays within the cap while the physical
//! size is unchanged.

use crate::config::PageEncoding;
use crate::error::DocumentError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;

/// Largest page side (in default user units) accepted by common readers.
pub const MAX_PAGE_UNITS: f32 = 14_400.0;

/// One encoded strip, ready to become a page.
#[derive(Debug, Clone)]
pub struct PageFragment {
    pub width_px: u32,
    pub height_px: u32,
    /// `/FlateDecode` or `/DCTDecode`.
    filter: &'static str,
    data: Vec<u8>,
    /// Page size in user units.
    width_units: f32,
    height_units: f32,
    user_unit: Option<f32>,
}

impl PageFragment {
    pub fn filter(&self) -> &'static str {
        self.filter
    }

    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }

    /// Page size in points (1/72 in), independent of `/UserUnit`.
    pub fn size_pt(&self) -> (f32, f32) {
        let unit = self.user_unit.unwrap_or(1.0);
        (self.width_units * unit, self.height_units * unit)
    }
}

/// Encode one strip as a page fragment.
///
/// `page` is 1-based and only used for error attribution.
pub fn encode_strip(
    strip: &RgbImage,
    page: usize,
    encoding: PageEncoding,
    dpi: f32,
) -> Result<PageFragment, DocumentError> {
    let (w, h) = strip.dimensions();
    if w == 0 || h == 0 {
        return Err(DocumentError::Encode {
            page,
            detail: format!("degenerate strip {w}x{h}"),
        });
    }

    let (filter, data) = match encoding {
        PageEncoding::Flate => ("FlateDecode", deflate(strip.as_raw()).map_err(|e| {
            DocumentError::Encode {
                page,
                detail: e.to_string(),
            }
        })?),
        PageEncoding::Jpeg { quality } => {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, quality)
                .encode_image(strip)
                .map_err(|e| DocumentError::Encode {
                    page,
                    detail: e.to_string(),
                })?;
            ("DCTDecode", buf)
        }
    };

    let width_pt = w as f32 * 72.0 / dpi;
    let height_pt = h as f32 * 72.0 / dpi;
    let longest = width_pt.max(height_pt);
    let user_unit = (longest > MAX_PAGE_UNITS).then(|| longest / MAX_PAGE_UNITS);
    let unit = user_unit.unwrap_or(1.0);

    Ok(PageFragment {
        width_px: w,
        height_px: h,
        filter,
        data,
        width_units: width_pt / unit,
        height_units: height_pt / unit,
        user_unit,
    })
}

fn deflate(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}

/// Accumulates pages into one PDF document.
pub struct PdfAssembler {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfAssembler {
    pub fn new() -> Self {
        // UserUnit needs PDF 1.6.
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Add `fragment` as the next page.
    pub fn append(&mut self, fragment: PageFragment) {
        let (w, h) = (fragment.width_units, fragment.height_units);

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => fragment.width_px as i64,
                "Height" => fragment.height_px as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => fragment.filter,
            },
            fragment.data,
        )
        .with_compression(false);
        let image_id = self.doc.add_object(image);

        let content = format!("q {w} 0 0 {h} 0 0 cm /Im0 Do Q").into_bytes();
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));

        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(w), Object::Real(h)],
        };
        if let Some(unit) = fragment.user_unit {
            page.set("UserUnit", Object::Real(unit));
        }
        let page_id = self.doc.add_object(page);
        self.kids.push(Object::Reference(page_id));
    }

    /// Write the page tree and catalog and serialize the document.
    pub fn finish(mut self) -> Result<Vec<u8>, DocumentError> {
        if self.kids.is_empty() {
            return Err(DocumentError::EmptyPage);
        }
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let info_id = self.doc.add_object(dictionary! {
            "Producer" => Object::string_literal(concat!("html2pdf-strips ", env!("CARGO_PKG_VERSION"))),
        });
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| DocumentError::Internal(format!("PDF serialization failed: {e}")))?;
        Ok(out)
    }
}

/// Encode every strip and merge the pages in order.
///
/// Strips are pulled one at a time and dropped once encoded. The first
/// error, from the source or from encoding, fails the whole document and
/// stops consumption.
pub fn paginate<I>(strips: I, encoding: PageEncoding, dpi: f32) -> Result<Vec<u8>, DocumentError>
where
    I: IntoIterator<Item = Result<RgbImage, DocumentError>>,
{
    let mut assembler = PdfAssembler::new();
    for (i, strip) in strips.into_iter().enumerate() {
        let strip = strip?;
        assembler.append(encode_strip(&strip, i + 1, encoding, dpi)?);
    }
    assembler.finish()
}
