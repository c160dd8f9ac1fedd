//! Raster codec capability: decode PDF image streams into pixel buffers,
//! resample them, and re-encode to PDF-ready streams.
//!
//! FlateDecode and unfiltered rasters decode straight from the declared
//! geometry; DCTDecode goes through the `image` crate; CCITT group 4 goes
//! through the `fax` decoder. Re-encoding is either a packed raster behind
//! FlateDecode at best compression or a DCTDecode stream.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::imageops::colorops::{index_colors, BiLevel};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{dictionary, Stream};

use crate::document::{ColorModel, FaxParams, IndexedBase, SourceImage};
use crate::error::ImageFault;
use crate::filter::FilterKind;

/// Encoder setting for DCT output.
pub const JPEG_QUALITY: u8 = 75;

/// Pixel layout of the source image before decoding, as far as the
/// quantization rules care about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// One bit per pixel.
    Bitonal,
    /// Grayscale at the given bits per component.
    Gray(u32),
    /// Palette image: index width in bits, and whether the palette is gray.
    Indexed { bits: u32, gray: bool },
    /// Anything decoded to full color.
    Truecolor,
}

impl SourceFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            SourceFormat::Bitonal => 1,
            SourceFormat::Gray(bits) => *bits,
            SourceFormat::Indexed { bits, .. } => *bits,
            SourceFormat::Truecolor => 24,
        }
    }
}

/// A decoded pixel buffer plus what it was decoded from.
pub struct Decoded {
    pub image: DynamicImage,
    pub source_format: SourceFormat,
}

/// Target pixel depth for re-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDepth {
    Bitonal,
    Gray8,
    Rgb8,
}

impl TargetDepth {
    pub fn is_gray(&self) -> bool {
        !matches!(self, TargetDepth::Rgb8)
    }
}

/// The depth the buffer itself suggests, absent any quantization rule.
pub fn natural_depth(image: &DynamicImage) -> TargetDepth {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => TargetDepth::Gray8,
        _ => TargetDepth::Rgb8,
    }
}

/// Decode an image stream into a pixel buffer.
///
/// `Ok(None)` means the data is not decodable here (G3 fax, empty
/// content); the caller skips the image without logging an error.
/// `Err` means the structure or data is invalid.
pub fn decode(source: &SourceImage) -> Result<Option<Decoded>, ImageFault> {
    if source.content.is_empty() {
        return Ok(None);
    }
    match source.filter {
        FilterKind::Absent => decode_raw(source, source.content.clone()).map(Some),
        FilterKind::Deflate => {
            let data = inflate(&source.content)?;
            decode_raw(source, data).map(Some)
        }
        FilterKind::Dct => decode_dct(&source.content).map(Some),
        FilterKind::Bilevel => Ok(decode_fax_g4(&source.content, &source.fax)),
        FilterKind::CompoundArray => decode_compound(source),
        // Never dispatched to a strategy; nothing to decode.
        FilterKind::Unsupported => Ok(None),
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, ImageFault> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| ImageFault::malformed(format!("flate decode failed: {e}")))?;
    Ok(decoded)
}

fn decode_dct(data: &[u8]) -> Result<Decoded, ImageFault> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| ImageFault::invalid(format!("DCT decode failed: {e}")))?;
    let source_format = match &image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => SourceFormat::Gray(8),
        _ => SourceFormat::Truecolor,
    };
    Ok(Decoded {
        image,
        source_format,
    })
}

/// Unwrap a multi-filter chain: any number of Flate layers, optionally
/// ending in DCT. These arrays wrap an already-decoded bitmap in this
/// corpus, which is why they reach the continuous-tone path at all.
fn decode_compound(source: &SourceImage) -> Result<Option<Decoded>, ImageFault> {
    let mut data = source.content.clone();
    for (i, name) in source.filter_names.iter().enumerate() {
        match name.as_slice() {
            b"FlateDecode" => data = inflate(&data)?,
            b"DCTDecode" if i + 1 == source.filter_names.len() => {
                return decode_dct(&data).map(Some);
            }
            other => {
                return Err(ImageFault::malformed(format!(
                    "unsupported filter chain entry: {}",
                    String::from_utf8_lossy(other)
                )));
            }
        }
    }
    decode_raw(source, data).map(Some)
}

/// Decode unfiltered samples against the declared geometry and color model.
fn decode_raw(source: &SourceImage, data: Vec<u8>) -> Result<Decoded, ImageFault> {
    let (width, height, bits) = (source.width, source.height, source.bits_per_component);
    match &source.color {
        ColorModel::Gray => {
            let gray = if bits == 8 {
                take_exact(data, width as usize * height as usize, "grayscale")?
            } else {
                let mut values = unpack_sub_byte(&data, width, height, bits)?;
                scale_to_8bit(&mut values, bits);
                values
            };
            let image = GrayImage::from_raw(width, height, gray)
                .ok_or_else(|| ImageFault::invalid("grayscale buffer does not fit geometry"))?;
            let source_format = if bits == 1 {
                SourceFormat::Bitonal
            } else {
                SourceFormat::Gray(bits)
            };
            Ok(Decoded {
                image: DynamicImage::ImageLuma8(image),
                source_format,
            })
        }
        ColorModel::Rgb => {
            if bits != 8 {
                return Err(ImageFault::malformed(format!("RGB at {bits} bpc")));
            }
            let rgb = take_exact(data, width as usize * height as usize * 3, "RGB")?;
            let image = RgbImage::from_raw(width, height, rgb)
                .ok_or_else(|| ImageFault::invalid("RGB buffer does not fit geometry"))?;
            Ok(Decoded {
                image: DynamicImage::ImageRgb8(image),
                source_format: SourceFormat::Truecolor,
            })
        }
        ColorModel::Cmyk => {
            if bits != 8 {
                return Err(ImageFault::malformed(format!("CMYK at {bits} bpc")));
            }
            let cmyk = take_exact(data, width as usize * height as usize * 4, "CMYK")?;
            let image = RgbImage::from_raw(width, height, cmyk_to_rgb(&cmyk))
                .ok_or_else(|| ImageFault::invalid("CMYK buffer does not fit geometry"))?;
            Ok(Decoded {
                image: DynamicImage::ImageRgb8(image),
                source_format: SourceFormat::Truecolor,
            })
        }
        ColorModel::Indexed { base, lookup } => decode_indexed(source, data, *base, lookup),
    }
}

fn take_exact(data: Vec<u8>, expected: usize, what: &str) -> Result<Vec<u8>, ImageFault> {
    if data.len() < expected {
        return Err(ImageFault::invalid(format!(
            "{what} data too short: {} of {expected} bytes",
            data.len()
        )));
    }
    let mut data = data;
    data.truncate(expected);
    Ok(data)
}

fn decode_indexed(
    source: &SourceImage,
    data: Vec<u8>,
    base: IndexedBase,
    lookup: &[u8],
) -> Result<Decoded, ImageFault> {
    let (width, height, bits) = (source.width, source.height, source.bits_per_component);
    let indices = if bits == 8 {
        take_exact(data, width as usize * height as usize, "palette index")?
    } else {
        unpack_sub_byte(&data, width, height, bits)?
    };

    let components = match base {
        IndexedBase::Gray => 1,
        IndexedBase::Rgb => 3,
    };
    let mut pixels = Vec::with_capacity(indices.len() * components);
    for index in &indices {
        let offset = *index as usize * components;
        let entry = lookup
            .get(offset..offset + components)
            .ok_or_else(|| ImageFault::invalid(format!("palette index {index} out of range")))?;
        pixels.extend_from_slice(entry);
    }

    let source_format = SourceFormat::Indexed {
        bits,
        gray: components == 1,
    };
    let image = match base {
        IndexedBase::Gray => GrayImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| ImageFault::invalid("palette buffer does not fit geometry"))?,
        IndexedBase::Rgb => RgbImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| ImageFault::invalid("palette buffer does not fit geometry"))?,
    };
    Ok(Decoded {
        image,
        source_format,
    })
}

/// Expand packed 1/2/4-bit samples to one byte each, honoring per-row
/// byte alignment, MSB first. Values are raw, not scaled.
fn unpack_sub_byte(data: &[u8], width: u32, height: u32, bits: u32) -> Result<Vec<u8>, ImageFault> {
    if !matches!(bits, 1 | 2 | 4) {
        return Err(ImageFault::malformed(format!("{bits} bits per component")));
    }
    let width = width as usize;
    let bytes_per_row = (width * bits as usize).div_ceil(8);
    let expected = bytes_per_row * height as usize;
    if data.len() < expected {
        return Err(ImageFault::invalid(format!(
            "packed data too short: {} of {expected} bytes",
            data.len()
        )));
    }

    let max_val = (1u16 << bits) - 1;
    let per_byte = 8 / bits as usize;
    let mut out = Vec::with_capacity(width * height as usize);
    for row in 0..height as usize {
        let row_bytes = &data[row * bytes_per_row..(row + 1) * bytes_per_row];
        let mut x = 0;
        for &byte in row_bytes {
            for i in 0..per_byte {
                if x >= width {
                    break;
                }
                let shift = 8 - bits as u8 * (i as u8 + 1);
                out.push((byte >> shift) & max_val as u8);
                x += 1;
            }
        }
    }
    Ok(out)
}

fn scale_to_8bit(values: &mut [u8], bits: u32) {
    let max_val = (1u16 << bits) - 1;
    for v in values.iter_mut() {
        *v = (*v as u16 * 255 / max_val) as u8;
    }
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for chunk in cmyk.chunks_exact(4) {
        let c = chunk[0] as f32 / 255.0;
        let m = chunk[1] as f32 / 255.0;
        let y = chunk[2] as f32 / 255.0;
        let k = chunk[3] as f32 / 255.0;
        rgb.push(((1.0 - c) * (1.0 - k) * 255.0) as u8);
        rgb.push(((1.0 - m) * (1.0 - k) * 255.0) as u8);
        rgb.push(((1.0 - y) * (1.0 - k) * 255.0) as u8);
    }
    rgb
}

/// Decode CCITT group 4 data. Returns `None` for the G3 variants
/// (K >= 0) and for data the decoder rejects; the image is then skipped.
fn decode_fax_g4(data: &[u8], params: &Option<FaxParams>) -> Option<Decoded> {
    let params = params.as_ref()?;
    if params.k >= 0 {
        return None;
    }
    let width = u16::try_from(params.columns).ok()?;
    if width == 0 {
        return None;
    }

    let mut pixels: Vec<u8> = Vec::new();
    let mut rows = 0u32;
    let height = params.rows.and_then(|r| u16::try_from(r).ok());
    fax::decoder::decode_g4(data.iter().copied(), width, height, |transitions| {
        push_fax_row(transitions, width, &mut pixels);
        rows += 1;
    })?;
    if rows == 0 {
        return None;
    }

    let image = GrayImage::from_raw(params.columns, rows, pixels)?;
    Some(Decoded {
        image: DynamicImage::ImageLuma8(image),
        source_format: SourceFormat::Bitonal,
    })
}

/// Each row arrives as color-transition positions, starting from white.
fn push_fax_row(transitions: &[u16], width: u16, pixels: &mut Vec<u8>) {
    let start = pixels.len();
    pixels.resize(start + width as usize, 255);
    let row = &mut pixels[start..];

    let mut is_black = false;
    let mut prev: u16 = 0;
    for &pos in transitions {
        if is_black {
            for x in prev..pos.min(width) {
                row[x as usize] = 0;
            }
        }
        prev = pos;
        is_black = !is_black;
    }
    if is_black {
        for x in prev..width {
            row[x as usize] = 0;
        }
    }
}

/// Dimensions after applying the quality fraction as a linear scale on
/// both axes. `None` when either dimension collapses to zero; fractions
/// at or above 1 keep the source dimensions.
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> Option<(u32, u32)> {
    if scale >= 1.0 {
        return Some((width, height));
    }
    let w = (width as f32 * scale) as u32;
    let h = (height as f32 * scale) as u32;
    if w == 0 || h == 0 {
        None
    } else {
        Some((w, h))
    }
}

pub fn resample(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Threshold to a two-level grayscale buffer (0 or 255).
pub fn quantize_bitonal(image: &DynamicImage) -> GrayImage {
    let indices = index_colors(&image.to_luma8(), &BiLevel);
    GrayImage::from_fn(indices.width(), indices.height(), |x, y| {
        let level = indices.get_pixel(x, y).0[0];
        image::Luma([if level == 0 { 0 } else { 255 }])
    })
}

/// Pack a thresholded buffer into 1-bit rows, MSB first, 1 = white.
fn pack_bitonal_rows(image: &GrayImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let bytes_per_row = (width as usize).div_ceil(8);
    let mut out = vec![0u8; bytes_per_row * height as usize];
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[0] > 127 {
            out[y as usize * bytes_per_row + x as usize / 8] |= 1 << (7 - (x as usize % 8));
        }
    }
    out
}

fn deflate_best(data: &[u8]) -> Result<Vec<u8>, ImageFault> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| ImageFault::invalid(format!("flate encode failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ImageFault::invalid(format!("flate encode failed: {e}")))
}

fn raster_stream(
    width: u32,
    height: u32,
    color_space: &str,
    bits: i64,
    filter: &str,
    data: Vec<u8>,
) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => bits,
            "Filter" => filter,
        },
        data,
    )
}

/// Encode as a Flate-backed raster stream at best compression.
pub fn encode_lossless(image: &DynamicImage, depth: TargetDepth) -> Result<Stream, ImageFault> {
    let (width, height) = (image.width(), image.height());
    match depth {
        TargetDepth::Bitonal => {
            let bitonal = quantize_bitonal(image);
            let data = deflate_best(&pack_bitonal_rows(&bitonal))?;
            Ok(raster_stream(width, height, "DeviceGray", 1, "FlateDecode", data))
        }
        TargetDepth::Gray8 => {
            let data = deflate_best(image.to_luma8().as_raw())?;
            Ok(raster_stream(width, height, "DeviceGray", 8, "FlateDecode", data))
        }
        TargetDepth::Rgb8 => {
            let data = deflate_best(image.to_rgb8().as_raw())?;
            Ok(raster_stream(width, height, "DeviceRGB", 8, "FlateDecode", data))
        }
    }
}

/// Encode as a DCTDecode stream. The JPEG frame header caps both
/// dimensions at 65535.
pub fn encode_jpeg(image: &DynamicImage, gray: bool, quality: u8) -> Result<Stream, ImageFault> {
    let (width, height) = (image.width(), image.height());
    if width > u16::MAX.into() || height > u16::MAX.into() {
        return Err(ImageFault::invalid(format!(
            "{width}x{height} exceeds the JPEG dimension limit"
        )));
    }
    let mut jpeg = Vec::new();
    if gray {
        let luma = image.to_luma8();
        let encoder = jpeg_encoder::Encoder::new(&mut jpeg, quality);
        encoder
            .encode(
                luma.as_raw(),
                width as u16,
                height as u16,
                jpeg_encoder::ColorType::Luma,
            )
            .map_err(|e| ImageFault::invalid(format!("JPEG encode failed: {e}")))?;
        Ok(raster_stream(width, height, "DeviceGray", 8, "DCTDecode", jpeg))
    } else {
        let rgb = image.to_rgb8();
        let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg, quality);
        encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
        encoder
            .encode(
                rgb.as_raw(),
                width as u16,
                height as u16,
                jpeg_encoder::ColorType::Rgb,
            )
            .map_err(|e| ImageFault::invalid(format!("JPEG encode failed: {e}")))?;
        Ok(raster_stream(width, height, "DeviceRGB", 8, "DCTDecode", jpeg))
    }
}
