//! Strategy selection and execution: map an image's storage filter to a
//! recompression strategy, resolve its parameters, and run it.

use std::fmt;

use image::DynamicImage;
use log::debug;
use lopdf::Stream;

use crate::codec::{self, SourceFormat, TargetDepth, JPEG_QUALITY};
use crate::document::SourceImage;
use crate::error::{ImageFault, Result};
use crate::filter::FilterKind;
use crate::policy::{self, OutputFormat};

/// Which recompression strategy handles an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Fax-compressed or unfiltered sources, typically scanned pages.
    Bilevel,
    /// DCT, Flate, or filter-array sources carrying photographic content.
    ContinuousTone,
}

/// Parameters for one strategy call, resolved at selection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    /// Linear scale fraction applied to both axes.
    pub quality: f32,
    pub format: OutputFormat,
}

/// What a strategy did with an image.
pub enum Outcome {
    Replaced {
        image: Stream,
        mask: Option<Stream>,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The scale fraction collapsed a dimension to zero.
    ZeroDimension,
    /// The data is not decodable here (G3 fax, empty stream).
    Undecodable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ZeroDimension => write!(f, "target dimensions collapsed to zero"),
            SkipReason::Undecodable => write!(f, "data not decodable"),
        }
    }
}

/// Map a filter kind to a strategy and its parameters. `None` means no
/// strategy applies and the image stays untouched.
///
/// Quality resolves in order: explicit override, document-name policy,
/// strategy default. Output format: document-name policy, else lossless.
pub fn select(
    filter: FilterKind,
    document_name: &str,
    quality_override: Option<f32>,
) -> Option<(StrategyKind, StrategyParams)> {
    let kind = match filter {
        FilterKind::Bilevel | FilterKind::Absent => StrategyKind::Bilevel,
        FilterKind::Dct | FilterKind::Deflate | FilterKind::CompoundArray => {
            StrategyKind::ContinuousTone
        }
        FilterKind::Unsupported => return None,
    };
    let default_quality = match kind {
        StrategyKind::Bilevel => policy::BILEVEL_DEFAULT_QUALITY,
        StrategyKind::ContinuousTone => policy::CONTINUOUS_TONE_DEFAULT_QUALITY,
    };
    let quality = quality_override
        .or_else(|| policy::quality_for_name(document_name))
        .unwrap_or(default_quality);
    let format = policy::format_for_name(document_name).unwrap_or(OutputFormat::Lossless);
    Some((kind, StrategyParams { quality, format }))
}

/// Run the selected strategy over one image: decode, shrink by the scale
/// fraction, re-encode. The soft mask, when present, shrinks by the same
/// fraction.
pub fn compress(
    source: &SourceImage,
    kind: StrategyKind,
    params: StrategyParams,
) -> Result<Outcome, ImageFault> {
    let Some(decoded) = codec::decode(source)? else {
        return Ok(Outcome::Skipped(SkipReason::Undecodable));
    };
    let Some((width, height)) = codec::scaled_dimensions(source.width, source.height, params.quality)
    else {
        return Ok(Outcome::Skipped(SkipReason::ZeroDimension));
    };

    let source_format = decoded.source_format;
    let image = if (width, height) != (decoded.image.width(), decoded.image.height()) {
        codec::resample(&decoded.image, width, height)
    } else {
        decoded.image
    };

    let depth = target_depth(kind, source_format, &image);
    let stream = encode(&image, depth, params.format)?;
    let mask = recompress_mask(source, params)?;
    Ok(Outcome::Replaced {
        image: stream,
        mask,
    })
}

/// Depth of the re-encoded image.
///
/// The bilevel strategy treats anything at or below 8 bits per pixel as
/// scanned material: 1-bit sources stay bi-level, the rest becomes 8-bit
/// grayscale. The continuous-tone strategy keeps the decoded depth class,
/// with palettes folded to their base.
fn target_depth(kind: StrategyKind, format: SourceFormat, image: &DynamicImage) -> TargetDepth {
    match kind {
        StrategyKind::Bilevel => {
            if format.bits_per_pixel() <= 8 {
                match format {
                    SourceFormat::Bitonal | SourceFormat::Indexed { bits: 1, .. } => {
                        TargetDepth::Bitonal
                    }
                    _ => TargetDepth::Gray8,
                }
            } else {
                codec::natural_depth(image)
            }
        }
        StrategyKind::ContinuousTone => match format {
            SourceFormat::Bitonal | SourceFormat::Indexed { bits: 1, .. } => TargetDepth::Bitonal,
            SourceFormat::Indexed { gray: true, .. } => TargetDepth::Gray8,
            SourceFormat::Indexed { gray: false, .. } => TargetDepth::Rgb8,
            _ => codec::natural_depth(image),
        },
    }
}

fn encode(
    image: &DynamicImage,
    depth: TargetDepth,
    format: OutputFormat,
) -> Result<Stream, ImageFault> {
    match format {
        OutputFormat::Lossless => codec::encode_lossless(image, depth),
        OutputFormat::Jpeg => match depth {
            // DCT has no 1-bit mode; threshold first, then encode gray.
            TargetDepth::Bitonal => {
                let bitonal = DynamicImage::ImageLuma8(codec::quantize_bitonal(image));
                codec::encode_jpeg(&bitonal, true, JPEG_QUALITY)
            }
            _ => codec::encode_jpeg(image, depth.is_gray(), JPEG_QUALITY),
        },
    }
}

/// A mask that cannot be decoded or would collapse to zero is dropped
/// rather than failing its image.
fn recompress_mask(
    source: &SourceImage,
    params: StrategyParams,
) -> Result<Option<Stream>, ImageFault> {
    let Some(mask) = source.smask.as_deref() else {
        return Ok(None);
    };
    let decoded = match codec::decode(mask) {
        Ok(Some(decoded)) => decoded,
        Ok(None) => {
            debug!("soft mask not decodable, dropping it");
            return Ok(None);
        }
        Err(fault) => {
            debug!("soft mask dropped: {fault}");
            return Ok(None);
        }
    };
    let Some((width, height)) = codec::scaled_dimensions(mask.width, mask.height, params.quality)
    else {
        return Ok(None);
    };

    let image = if (width, height) != (decoded.image.width(), decoded.image.height()) {
        codec::resample(&decoded.image, width, height)
    } else {
        decoded.image
    };
    let stream = match params.format {
        OutputFormat::Lossless => codec::encode_lossless(&image, TargetDepth::Gray8)?,
        OutputFormat::Jpeg => codec::encode_jpeg(&image, true, JPEG_QUALITY)?,
    };
    Ok(Some(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ColorModel;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use lopdf::Object;
    use std::io::Write;

    #[test]
    fn dispatch_covers_every_filter_kind() {
        let select_kind = |f| select(f, "x.pdf", None).map(|(kind, _)| kind);
        assert_eq!(select_kind(FilterKind::Bilevel), Some(StrategyKind::Bilevel));
        assert_eq!(select_kind(FilterKind::Absent), Some(StrategyKind::Bilevel));
        assert_eq!(select_kind(FilterKind::Dct), Some(StrategyKind::ContinuousTone));
        assert_eq!(select_kind(FilterKind::Deflate), Some(StrategyKind::ContinuousTone));
        assert_eq!(
            select_kind(FilterKind::CompoundArray),
            Some(StrategyKind::ContinuousTone)
        );
        assert_eq!(select_kind(FilterKind::Unsupported), None);
    }

    #[test]
    fn name_prefix_sets_quality_and_format() {
        let (_, params) = select(FilterKind::Bilevel, "T_scan.pdf", None).unwrap();
        assert_eq!(params.quality, 0.37);
        assert_eq!(params.format, OutputFormat::Lossless);

        let (kind, params) = select(FilterKind::Dct, "SOU_report.pdf", None).unwrap();
        assert_eq!(kind, StrategyKind::ContinuousTone);
        assert_eq!(params.quality, 0.65);
        assert_eq!(params.format, OutputFormat::Jpeg);
    }

    #[test]
    fn defaults_apply_when_no_prefix_matches() {
        let (_, params) = select(FilterKind::Absent, "plain.pdf", None).unwrap();
        assert_eq!(params.quality, policy::BILEVEL_DEFAULT_QUALITY);
        assert_eq!(params.format, OutputFormat::Lossless);

        let (_, params) = select(FilterKind::Deflate, "plain.pdf", None).unwrap();
        assert_eq!(params.quality, policy::CONTINUOUS_TONE_DEFAULT_QUALITY);
    }

    #[test]
    fn override_beats_name_policy() {
        let (_, params) = select(FilterKind::Bilevel, "T_scan.pdf", Some(0.8)).unwrap();
        assert_eq!(params.quality, 0.8);
    }

    fn gray_flate_source(width: u32, height: u32) -> SourceImage {
        let raw: Vec<u8> = (0..width as usize * height as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&raw).unwrap();
        SourceImage {
            id: (1, 0),
            width,
            height,
            bits_per_component: 8,
            color: ColorModel::Gray,
            filter: FilterKind::Deflate,
            filter_names: vec![b"FlateDecode".to_vec()],
            content: encoder.finish().unwrap(),
            fax: None,
            smask: None,
        }
    }

    #[test]
    fn continuous_tone_shrinks_by_scale_fraction() {
        let source = gray_flate_source(100, 100);
        let params = StrategyParams {
            quality: 0.37,
            format: OutputFormat::Lossless,
        };
        match compress(&source, StrategyKind::ContinuousTone, params).unwrap() {
            Outcome::Replaced { image, mask } => {
                assert!(mask.is_none());
                assert_eq!(image.dict.get(b"Width").unwrap(), &Object::Integer(37));
                assert_eq!(image.dict.get(b"Height").unwrap(), &Object::Integer(37));
                assert_eq!(
                    image.dict.get(b"Filter").unwrap(),
                    &Object::Name(b"FlateDecode".to_vec())
                );
            }
            Outcome::Skipped(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn collapsing_scale_skips_silently() {
        let source = gray_flate_source(4, 4);
        let params = StrategyParams {
            quality: 0.1,
            format: OutputFormat::Lossless,
        };
        match compress(&source, StrategyKind::ContinuousTone, params).unwrap() {
            Outcome::Skipped(reason) => assert_eq!(reason, SkipReason::ZeroDimension),
            Outcome::Replaced { .. } => panic!("expected a skip"),
        }
    }

    #[test]
    fn g3_fax_skips_as_undecodable() {
        let source = SourceImage {
            id: (1, 0),
            width: 10,
            height: 10,
            bits_per_component: 1,
            color: ColorModel::Gray,
            filter: FilterKind::Bilevel,
            filter_names: vec![b"CCITTFaxDecode".to_vec()],
            content: vec![1, 2, 3],
            fax: Some(crate::document::FaxParams {
                columns: 10,
                rows: None,
                k: 0,
            }),
            smask: None,
        };
        let (kind, params) = select(FilterKind::Bilevel, "scan.pdf", None).unwrap();
        match compress(&source, kind, params).unwrap() {
            Outcome::Skipped(reason) => assert_eq!(reason, SkipReason::Undecodable),
            Outcome::Replaced { .. } => panic!("expected a skip"),
        }
    }
}
