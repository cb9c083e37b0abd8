//! Extracting pages from a multi-page TIFF.
//!
//! The `image` crate only ever shows us the first frame of a TIFF, so we walk
//! the IFD chain ourselves using [`tiff`]. Scanned documents almost always
//! store one page per top-level IFD. Pages can also hide in SubIFDs. If we see
//! a SubIFD that might be a page, we fail the file rather than silently
//! dropping text.
//!
//! Decoding, resampling and encoding are all CPU-bound, so [`PageIter`] is a
//! plain blocking [`Iterator`]. Wrap it in a
//! [`BlockingIterStream`](crate::async_utils::blocking_iter_streams::BlockingIterStream)
//! to use it from async code.

use std::{
    fmt,
    io::{Cursor, Read, Seek},
};

use image::{
    DynamicImage, GrayImage, RgbImage, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
};
use tiff::{
    ColorType,
    decoder::{Decoder, DecodingResult, ifd::Value},
    tags::{IfdPointer, Tag},
};

use super::fit::resize_to_fit;
use crate::{
    config::{PageFormat, PageLimits},
    error::OcrError,
    prelude::*,
};

/// The only input type we accept.
const TIFF_MIME_TYPE: &str = "image/tiff";

/// JPEG qualities to try, in order, when a page is too large to upload.
const JPEG_QUALITIES: &[u8] = &[90, 80, 70, 60, 50];

/// A page, ready to send to an OCR service.
#[derive(Clone)]
pub struct PageImage {
    /// The name of the document this page belongs to.
    pub document_name: String,
    /// 1-based page number.
    pub index: usize,
    /// Number of pages in the document.
    pub total_pages: usize,
    /// The encoded image.
    pub bytes: Vec<u8>,
    /// The MIME type of `bytes`.
    pub mime_type: &'static str,
    /// Width of the frame as stored in the TIFF.
    pub original_width: u32,
    /// Height of the frame as stored in the TIFF.
    pub original_height: u32,
    /// Width of the encoded image.
    pub scaled_width: u32,
    /// Height of the encoded image.
    pub scaled_height: u32,
}

impl PageImage {
    /// A human-readable name for this page, used in logs and errors.
    pub fn name(&self) -> String {
        page_name(&self.document_name, self.index, self.total_pages)
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("document_name", &self.document_name)
            .field("index", &self.index)
            .field("total_pages", &self.total_pages)
            .field("bytes", &format_args!("[{} bytes]", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("original_width", &self.original_width)
            .field("original_height", &self.original_height)
            .field("scaled_width", &self.scaled_width)
            .field("scaled_height", &self.scaled_height)
            .finish()
    }
}

/// Format a page name, e.g. `"scan.tif - Page 2 of 3"`.
pub fn page_name(document_name: &str, index: usize, total_pages: usize) -> String {
    format!("{document_name} - Page {index} of {total_pages}")
}

/// Iterates over the pages of a TIFF, in frame order.
///
/// After the first error, the iterator is exhausted.
pub struct PageIter {
    name: String,
    decoder: Decoder<Cursor<Vec<u8>>>,
    limits: PageLimits,
    total_pages: usize,
    next_index: usize,
    failed: bool,
}

impl PageIter {
    /// Prepare to extract pages from `bytes`.
    ///
    /// This reads the IFD chain to count frames, but does not decode any
    /// image data.
    pub fn from_bytes(name: &str, bytes: Vec<u8>, limits: PageLimits) -> Result<Self> {
        match infer::get(&bytes).map(|t| t.mime_type()) {
            Some(TIFF_MIME_TYPE) => {}
            Some(other) => {
                return Err(OcrError::decode(
                    name,
                    format!("expected {TIFF_MIME_TYPE}, found {other}"),
                )
                .into());
            }
            None => {
                return Err(
                    OcrError::decode(name, "input is not a recognized image type").into()
                );
            }
        }

        let total_pages = count_frames(&bytes).map_err(|e| OcrError::decode(name, e))?;
        let decoder =
            Decoder::new(Cursor::new(bytes)).map_err(|e| OcrError::decode(name, e))?;
        debug!(name, total_pages, "Counted TIFF frames");
        Ok(Self {
            name: name.to_owned(),
            decoder,
            limits,
            total_pages,
            next_index: 0,
            failed: false,
        })
    }

    /// The number of pages in this document.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Decode, fit and encode the frame the decoder is currently positioned
    /// on.
    fn extract_current(&mut self) -> Result<PageImage, OcrError> {
        let ifd_index = self.next_index;
        let index = ifd_index + 1;
        let page = page_name(&self.name, index, self.total_pages);

        if ifd_index > 0 {
            self.decoder
                .next_image()
                .map_err(|e| OcrError::decode(&self.name, e))?;
        }
        validate_subifds(&mut self.decoder, &self.name, ifd_index)
            .map_err(|e| OcrError::decode(&self.name, e))?;

        let (original_width, original_height) = self
            .decoder
            .dimensions()
            .map_err(|e| OcrError::decode(&self.name, e))?;
        if original_width == 0 || original_height == 0 {
            return Err(OcrError::decode(
                &self.name,
                format!("frame {index} has no pixels"),
            ));
        }
        let image = decode_tiff_image(&mut self.decoder, original_width, original_height)
            .map_err(|e| OcrError::decode(&self.name, e))?;

        let limits = &self.limits;
        let image = resize_to_fit(image, limits.max_width, limits.max_height);
        let (scaled_width, scaled_height) = (image.width(), image.height());
        if scaled_width < limits.min_width || scaled_height < limits.min_height {
            return Err(OcrError::unsupported_page(
                &page,
                format!(
                    "{scaled_width}x{scaled_height} is smaller than the minimum of {}x{}",
                    limits.min_width, limits.min_height
                ),
            ));
        }

        let bytes = encode_page(&image, limits, &page)?;
        trace!(
            page = %page,
            original_width,
            original_height,
            scaled_width,
            scaled_height,
            size = bytes.len(),
            "Extracted page"
        );
        Ok(PageImage {
            document_name: self.name.clone(),
            index,
            total_pages: self.total_pages,
            bytes,
            mime_type: limits.format.mime_type(),
            original_width,
            original_height,
            scaled_width,
            scaled_height,
        })
    }
}

impl Iterator for PageIter {
    type Item = Result<PageImage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_index >= self.total_pages {
            return None;
        }
        let result = self.extract_current();
        self.next_index += 1;
        if result.is_err() {
            self.failed = true;
        }
        Some(result.map_err(anyhow::Error::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            let remaining = self.total_pages - self.next_index;
            (remaining, Some(remaining))
        }
    }
}

/// Count the frames in a TIFF by walking its IFD chain.
fn count_frames(bytes: &[u8]) -> Result<usize, tiff::TiffError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let mut count = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        count += 1;
    }
    Ok(count)
}

/// Encode a page, stepping down JPEG quality until it fits in
/// `limits.max_bytes`.
fn encode_page(image: &DynamicImage, limits: &PageLimits, page: &str) -> Result<Vec<u8>, OcrError> {
    let encode_failed = |e: image::ImageError| {
        OcrError::unsupported_page(page, format!("could not encode page: {e}"))
    };

    match limits.format {
        PageFormat::Png => {
            let mut bytes = Vec::new();
            image
                .write_with_encoder(PngEncoder::new(&mut bytes))
                .map_err(encode_failed)?;
            if bytes.len() > limits.max_bytes {
                return Err(too_large(page, bytes.len(), limits.max_bytes));
            }
            Ok(bytes)
        }
        PageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let image = match image {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            let mut last_len = 0;
            for &quality in JPEG_QUALITIES {
                let mut bytes = Vec::new();
                image
                    .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
                    .map_err(encode_failed)?;
                if bytes.len() <= limits.max_bytes {
                    return Ok(bytes);
                }
                debug!(page, quality, size = bytes.len(), "Page too large, re-encoding");
                last_len = bytes.len();
            }
            Err(too_large(page, last_len, limits.max_bytes))
        }
    }
}

fn too_large(page: &str, len: usize, max: usize) -> OcrError {
    OcrError::unsupported_page(
        page,
        format!("encoded page is {len} bytes, more than the maximum of {max}"),
    )
}

// ============================================================================
// TIFF decoding helpers
// ============================================================================

/// NewSubfileType bits from TIFF 6.0.
mod subfile_type {
    /// Reduced resolution image (thumbnail or preview).
    pub const REDUCED_RESOLUTION: u32 = 0x1;
    /// One page of a multi-page document.
    pub const SINGLE_PAGE: u32 = 0x2;
    /// Transparency mask for another image.
    pub const TRANSPARENCY_MASK: u32 = 0x4;
    /// DNG extensions: depth map, enhanced image, semantic mask.
    pub const DNG_BITS: u32 = 0x8 | 0x10 | 0x10000;
}

/// Make sure the current IFD's SubIFDs, if any, contain nothing we might
/// mistake for missing pages.
fn validate_subifds<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    name: &str,
    ifd_index: usize,
) -> Result<(), String> {
    let subifd_value = match decoder.find_tag(Tag::SubIfd) {
        Ok(Some(value)) => value,
        Ok(None) | Err(_) => return Ok(()),
    };

    let offsets: Vec<u64> = match subifd_value {
        Value::Ifd(offset) => vec![u64::from(offset)],
        Value::List(list) => list
            .iter()
            .filter_map(|v| match v {
                Value::Ifd(offset) => Some(u64::from(*offset)),
                _ => None,
            })
            .collect(),
        _ => return Ok(()),
    };

    for (sub_idx, &offset) in offsets.iter().enumerate() {
        let subdir = match decoder.read_directory(IfdPointer(offset)) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(name, ifd_index, sub_idx, "Could not read SubIFD: {e}");
                continue;
            }
        };

        let kind = new_subfile_type(decoder, &subdir);
        let skippable = subfile_type::REDUCED_RESOLUTION
            | subfile_type::TRANSPARENCY_MASK
            | subfile_type::DNG_BITS;
        if kind & skippable != 0 {
            debug!(name, ifd_index, sub_idx, kind, "Skipping non-page SubIFD");
            continue;
        }

        if kind == 0 || kind & subfile_type::SINGLE_PAGE != 0 {
            return Err(format!(
                "IFD {ifd_index} has a SubIFD ({sub_idx}, NewSubfileType={kind}) which may \
                 contain pages we would otherwise drop; convert it to one page per IFD first"
            ));
        }
    }
    Ok(())
}

/// Get the NewSubfileType of a SubIFD, defaulting to 0.
fn new_subfile_type<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    subdir: &tiff::Directory,
) -> u32 {
    let mut ifd_decoder = decoder.read_directory_tags(subdir);
    match ifd_decoder.find_tag(Tag::NewSubfileType) {
        Ok(Some(value)) => value.into_u32().unwrap_or(0),
        _ => 0,
    }
}

/// Decode the current frame.
fn decode_tiff_image<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    width: u32,
    height: u32,
) -> Result<DynamicImage, String> {
    let color_type = decoder.colortype().map_err(|e| e.to_string())?;
    let result = decoder.read_image().map_err(|e| e.to_string())?;
    let wrong_size = || format!("frame data does not match its {width}x{height} size");

    let image = match (result, color_type) {
        (DecodingResult::U8(data), ColorType::Gray(1)) => {
            let data = unpack_bilevel(&data, width, height).ok_or_else(wrong_size)?;
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (DecodingResult::U8(data), ColorType::Gray(8)) => {
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (DecodingResult::U8(data), ColorType::RGB(8)) => {
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (DecodingResult::U8(data), ColorType::RGBA(8)) => {
            DynamicImage::ImageRgba8(RgbaImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (DecodingResult::U16(data), ColorType::Gray(16)) => {
            let data = data.iter().map(|&v| (v >> 8) as u8).collect();
            DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (DecodingResult::U16(data), ColorType::RGB(16)) => {
            let data = data.iter().map(|&v| (v >> 8) as u8).collect();
            DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, data).ok_or_else(wrong_size)?)
        }
        (_, other) => return Err(format!("unsupported TIFF color type {other:?}")),
    };
    Ok(image)
}

/// Unpack 1-bit samples into 8-bit gray. Rows are padded to whole bytes, and
/// a set bit is white.
fn unpack_bilevel(packed: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let (width, height) = (width as usize, height as usize);
    let row_bytes = width.div_ceil(8);
    if packed.len() < row_bytes * height {
        return None;
    }
    let mut out = Vec::with_capacity(width * height);
    for row in packed.chunks_exact(row_bytes).take(height) {
        for x in 0..width {
            let bit = (row[x / 8] >> (7 - x % 8)) & 1;
            out.push(if bit == 1 { 0xFF } else { 0x00 });
        }
    }
    Some(out)
}
