//! Document object access: XObject discovery, image metadata, in-place
//! replacement, content-stream rewrite, and the cleanup operations.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{ImageFault, Result};
use crate::filter::{self, FilterKind};

/// One entry of a page's XObject table. `target` is `None` for entries
/// inlined directly in the table; those are never touched.
#[derive(Debug)]
pub struct XObjectEntry {
    pub name: String,
    pub target: Option<ObjectId>,
}

/// Color model of an image, resolved from its `ColorSpace` entry.
#[derive(Debug, Clone)]
pub enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// Palette image; `lookup` holds `hival + 1` packed base-color entries.
    Indexed { base: IndexedBase, lookup: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedBase {
    Gray,
    Rgb,
}

/// CCITT decode parameters relevant to group 4 data.
#[derive(Debug, Clone)]
pub struct FaxParams {
    pub columns: u32,
    pub rows: Option<u32>,
    pub k: i32,
}

/// Everything the strategies need to know about one image stream.
#[derive(Debug)]
pub struct SourceImage {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u32,
    pub color: ColorModel,
    pub filter: FilterKind,
    /// Resolved filter names, outermost first; used for compound arrays.
    pub filter_names: Vec<Vec<u8>>,
    pub content: Vec<u8>,
    pub fax: Option<FaxParams>,
    pub smask: Option<Box<SourceImage>>,
}

fn resolved<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn as_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
        _ => None,
    }
}

/// The page's XObject table, or `None` when the page has no resources or
/// no XObject entry. Resources are inherited through the page tree.
pub fn page_xobject_table(doc: &Document, page_id: ObjectId) -> Option<Vec<XObjectEntry>> {
    let page = doc.get_dictionary(page_id).ok()?;
    let resources = match page.get(b"Resources") {
        Ok(obj) => as_dict(doc, obj)?,
        Err(_) => inherited_resources(doc, page)?,
    };
    let xobjects = as_dict(doc, resources.get(b"XObject").ok()?)?;

    let mut entries = Vec::new();
    for (name, value) in xobjects.iter() {
        entries.push(XObjectEntry {
            name: String::from_utf8_lossy(name).to_string(),
            target: match value {
                Object::Reference(id) => Some(*id),
                _ => None,
            },
        });
    }
    Some(entries)
}

fn inherited_resources<'a>(doc: &'a Document, page: &'a Dictionary) -> Option<&'a Dictionary> {
    let mut current = page.get(b"Parent").ok()?;
    for _ in 0..32 {
        let node = as_dict(doc, current)?;
        if let Ok(resources) = node.get(b"Resources") {
            return as_dict(doc, resources);
        }
        current = node.get(b"Parent").ok()?;
    }
    None
}

fn image_stream(doc: &Document, id: ObjectId) -> Option<&Stream> {
    match doc.get_object(id) {
        Ok(Object::Stream(stream)) => match stream.dict.get(b"Subtype") {
            Ok(Object::Name(name)) if name == b"Image" => Some(stream),
            _ => None,
        },
        _ => None,
    }
}

/// Filter kind of an image XObject; `None` when the object is not an
/// image stream at all.
pub fn image_filter(doc: &Document, id: ObjectId) -> Option<FilterKind> {
    image_stream(doc, id).map(|stream| filter::resolve_filter(doc, &stream.dict))
}

/// Read the metadata and raw bytes a strategy needs for one image.
pub fn read_source_image(doc: &Document, id: ObjectId) -> Result<SourceImage, ImageFault> {
    let stream =
        image_stream(doc, id).ok_or_else(|| ImageFault::malformed("object is not an image stream"))?;
    build_source(doc, id, stream, false)
}

fn build_source(
    doc: &Document,
    id: ObjectId,
    stream: &Stream,
    is_mask: bool,
) -> Result<SourceImage, ImageFault> {
    let dict = &stream.dict;
    let width = dict_u32(doc, dict, "Width")?;
    let height = dict_u32(doc, dict, "Height")?;
    let filter = filter::resolve_filter(doc, dict);

    let image_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    let bits_per_component = match dict.get(b"BitsPerComponent").map(|obj| resolved(doc, obj)) {
        Ok(Object::Integer(n)) if (1..=16).contains(n) => *n as u32,
        Ok(_) => return Err(ImageFault::invalid("BitsPerComponent out of range")),
        Err(_) if image_mask || filter == FilterKind::Bilevel => 1,
        Err(_) => 8,
    };

    // Soft masks are single-channel by definition.
    let color = if is_mask {
        ColorModel::Gray
    } else {
        match dict.get(b"ColorSpace") {
            Ok(obj) => resolve_color_model(doc, obj, 0)?,
            Err(_) if bits_per_component == 1 => ColorModel::Gray,
            Err(_) => ColorModel::Rgb,
        }
    };

    let smask = if is_mask {
        None
    } else {
        read_smask(doc, dict)
    };

    Ok(SourceImage {
        id,
        width,
        height,
        bits_per_component,
        color,
        filter,
        filter_names: filter::filter_chain(doc, dict),
        content: stream.content.clone(),
        fax: fax_params(doc, dict),
        smask,
    })
}

fn read_smask(doc: &Document, dict: &Dictionary) -> Option<Box<SourceImage>> {
    let Ok(Object::Reference(mask_id)) = dict.get(b"SMask") else {
        return None;
    };
    let Ok(Object::Stream(stream)) = doc.get_object(*mask_id) else {
        return None;
    };
    build_source(doc, *mask_id, stream, true).ok().map(Box::new)
}

fn dict_u32(doc: &Document, dict: &Dictionary, key: &'static str) -> Result<u32, ImageFault> {
    match dict.get(key.as_bytes()).map(|obj| resolved(doc, obj)) {
        Ok(Object::Integer(n)) if *n > 0 && *n <= i64::from(u32::MAX) => Ok(*n as u32),
        Ok(_) => Err(ImageFault::invalid(format!("{key} out of range"))),
        Err(_) => Err(ImageFault::MissingKey(key)),
    }
}

fn resolve_color_model(doc: &Document, obj: &Object, depth: u8) -> Result<ColorModel, ImageFault> {
    if depth > 4 {
        return Err(ImageFault::malformed("color space nesting too deep"));
    }
    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
            other => Err(ImageFault::malformed(format!(
                "unsupported color space: {}",
                String::from_utf8_lossy(other)
            ))),
        },
        Object::Array(items) => resolve_color_array(doc, items, depth),
        Object::Reference(id) => {
            let resolved = doc
                .get_object(*id)
                .map_err(|_| ImageFault::malformed("dangling color space reference"))?;
            resolve_color_model(doc, resolved, depth + 1)
        }
        _ => Err(ImageFault::malformed("unsupported color space object")),
    }
}

fn resolve_color_array(
    doc: &Document,
    items: &[Object],
    depth: u8,
) -> Result<ColorModel, ImageFault> {
    let family = match items.first() {
        Some(Object::Name(name)) => name.as_slice(),
        _ => return Err(ImageFault::malformed("empty color space array")),
    };
    match family {
        b"ICCBased" => {
            // The profile stream's /N gives the component count.
            let n = items.get(1).and_then(|o| icc_components(doc, o)).unwrap_or(3);
            match n {
                1 => Ok(ColorModel::Gray),
                3 => Ok(ColorModel::Rgb),
                4 => Ok(ColorModel::Cmyk),
                other => Err(ImageFault::malformed(format!("ICC profile with N = {other}"))),
            }
        }
        b"Indexed" | b"I" => {
            let base_obj = items
                .get(1)
                .ok_or_else(|| ImageFault::malformed("indexed color space without base"))?;
            let base = match resolve_color_model(doc, base_obj, depth + 1)? {
                ColorModel::Gray => IndexedBase::Gray,
                ColorModel::Rgb => IndexedBase::Rgb,
                _ => return Err(ImageFault::malformed("indexed over unsupported base")),
            };
            let lookup_obj = items
                .get(3)
                .ok_or_else(|| ImageFault::malformed("indexed color space without lookup"))?;
            let lookup = palette_bytes(doc, lookup_obj)
                .ok_or_else(|| ImageFault::malformed("unreadable palette lookup"))?;
            Ok(ColorModel::Indexed { base, lookup })
        }
        b"CalRGB" => Ok(ColorModel::Rgb),
        b"CalGray" => Ok(ColorModel::Gray),
        other => Err(ImageFault::malformed(format!(
            "unsupported color space: {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn icc_components(doc: &Document, obj: &Object) -> Option<i64> {
    let Object::Reference(id) = obj else {
        return None;
    };
    let Ok(Object::Stream(stream)) = doc.get_object(*id) else {
        return None;
    };
    stream.dict.get(b"N").ok()?.as_i64().ok()
}

fn palette_bytes(doc: &Document, obj: &Object) -> Option<Vec<u8>> {
    match obj {
        Object::String(bytes, _) => Some(bytes.clone()),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Stream(stream) => {
                if stream.dict.has(b"Filter") {
                    stream.decompressed_content().ok()
                } else {
                    Some(stream.content.clone())
                }
            }
            Object::String(bytes, _) => Some(bytes.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn decode_parms<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let obj = dict.get(b"DecodeParms").ok()?;
    match obj {
        Object::Dictionary(parms) => Some(parms),
        Object::Array(items) => items.first().and_then(|o| as_dict(doc, o)),
        Object::Reference(_) => as_dict(doc, obj),
        _ => None,
    }
}

fn fax_params(doc: &Document, dict: &Dictionary) -> Option<FaxParams> {
    let parms = decode_parms(doc, dict)?;
    let columns = match parms.get(b"Columns") {
        Ok(Object::Integer(n)) if *n > 0 => *n as u32,
        _ => 1728,
    };
    let rows = match parms.get(b"Rows") {
        Ok(Object::Integer(n)) if *n > 0 => Some(*n as u32),
        _ => None,
    };
    let k = match parms.get(b"K") {
        Ok(Object::Integer(n)) => *n as i32,
        _ => 0,
    };
    Some(FaxParams { columns, rows, k })
}

/// Bind a replacement image to the slot of the object it replaces. A new
/// soft mask overwrites the old mask object when one existed, otherwise
/// it gets a fresh object id.
pub fn replace_image(
    doc: &mut Document,
    id: ObjectId,
    mut image: Stream,
    mask: Option<(Option<ObjectId>, Stream)>,
) {
    if let Some((slot, mask_stream)) = mask {
        let mask_id = match slot {
            Some(mask_id) => {
                doc.objects.insert(mask_id, Object::Stream(mask_stream));
                mask_id
            }
            None => doc.add_object(Object::Stream(mask_stream)),
        };
        image.dict.set("SMask", Object::Reference(mask_id));
    }
    doc.objects.insert(id, Object::Stream(image));
}

/// Losslessly recompress a page's content streams in place at best
/// compression. A stream is only rewritten when that makes it smaller.
/// Returns how many streams were rewritten.
pub fn recompress_page_content(doc: &mut Document, page_id: ObjectId) -> Result<usize> {
    let stream_ids: Vec<ObjectId> = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![*id],
            Ok(Object::Array(items)) => {
                items.iter().filter_map(|o| o.as_reference().ok()).collect()
            }
            _ => Vec::new(),
        }
    };

    let mut rewritten = 0;
    for id in stream_ids {
        let Some(new_stream) = recompressed_stream(doc, id) else {
            continue;
        };
        doc.objects.insert(id, Object::Stream(new_stream));
        rewritten += 1;
    }
    Ok(rewritten)
}

fn recompressed_stream(doc: &Document, id: ObjectId) -> Option<Stream> {
    let Ok(Object::Stream(stream)) = doc.get_object(id) else {
        return None;
    };
    let plain = if stream.dict.has(b"Filter") {
        stream.decompressed_content().ok()?
    } else {
        stream.content.clone()
    };

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&plain).ok()?;
    let compressed = encoder.finish().ok()?;
    if compressed.len() >= stream.content.len() {
        return None;
    }

    let mut dict = stream.dict.clone();
    dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    dict.remove(b"DecodeParms");
    Some(Stream::new(dict, compressed))
}

/// Unlink `Annots` from every page and drop the annotation objects.
/// Returns how many objects were removed.
pub fn remove_annotations(doc: &mut Document) -> usize {
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    let mut removed = 0;
    for page_id in pages {
        let annot_ids: Vec<ObjectId> = {
            let Ok(page) = doc.get_dictionary(page_id) else {
                continue;
            };
            match page.get(b"Annots") {
                Ok(Object::Array(items)) => {
                    items.iter().filter_map(|o| o.as_reference().ok()).collect()
                }
                Ok(Object::Reference(array_id)) => {
                    let mut ids = vec![*array_id];
                    if let Ok(Object::Array(items)) = doc.get_object(*array_id) {
                        ids.extend(items.iter().filter_map(|o| o.as_reference().ok()));
                    }
                    ids
                }
                _ => Vec::new(),
            }
        };

        if let Ok(page) = doc.get_object_mut(page_id).and_then(|o| o.as_dict_mut()) {
            page.remove(b"Annots");
        }
        for id in annot_ids {
            if doc.objects.remove(&id).is_some() {
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn doc_with_page(resources: Option<Dictionary>) -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        };
        if let Some(resources) = resources {
            page.set("Resources", Object::Dictionary(resources));
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        (doc, page_id)
    }

    #[test]
    fn missing_xobject_table_is_none() {
        let (doc, page_id) = doc_with_page(Some(dictionary! {}));
        assert!(page_xobject_table(&doc, page_id).is_none());
    }

    #[test]
    fn empty_xobject_table_is_empty() {
        let (doc, page_id) = doc_with_page(Some(dictionary! {
            "XObject" => dictionary! {},
        }));
        let entries = page_xobject_table(&doc, page_id).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn direct_entries_have_no_target() {
        let (doc, page_id) = doc_with_page(Some(dictionary! {
            "XObject" => dictionary! {
                "Im0" => dictionary! { "Subtype" => "Image" },
            },
        }));
        let entries = page_xobject_table(&doc, page_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].target.is_none());
    }

    #[test]
    fn width_height_are_required_keys() {
        let doc = Document::with_version("1.7");
        let dict = dictionary! { "Width" => 10 };
        assert_eq!(dict_u32(&doc, &dict, "Width").unwrap(), 10);
        assert!(matches!(
            dict_u32(&doc, &dict, "Height"),
            Err(ImageFault::MissingKey("Height"))
        ));
    }

    #[test]
    fn geometry_and_depth_resolve_through_references() {
        let mut doc = Document::with_version("1.7");
        let width_id = doc.add_object(Object::Integer(8));
        let bits_id = doc.add_object(Object::Integer(8));
        let image_id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width_id,
                "Height" => 4,
                "BitsPerComponent" => bits_id,
                "ColorSpace" => "DeviceGray",
            },
            vec![0u8; 32],
        )));

        let source = read_source_image(&doc, image_id).unwrap();
        assert_eq!(source.width, 8);
        assert_eq!(source.height, 4);
        assert_eq!(source.bits_per_component, 8);
    }

    #[test]
    fn annotations_are_unlinked_and_dropped() {
        let (mut doc, page_id) = doc_with_page(None);
        let annot_id = doc.add_object(dictionary! { "Type" => "Annot", "Subtype" => "Link" });
        if let Ok(page) = doc.get_object_mut(page_id).and_then(|o| o.as_dict_mut()) {
            page.set("Annots", vec![annot_id.into()]);
        }

        assert_eq!(remove_annotations(&mut doc), 1);
        assert!(!doc.objects.contains_key(&annot_id));
        assert!(doc.get_dictionary(page_id).unwrap().get(b"Annots").is_err());
    }

    #[test]
    fn indexed_color_space_resolves_palette() {
        let doc = Document::with_version("1.7");
        let cs = Object::Array(vec![
            Object::Name(b"Indexed".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
            Object::Integer(1),
            Object::String(vec![0, 0, 0, 255, 255, 255], lopdf::StringFormat::Literal),
        ]);
        match resolve_color_model(&doc, &cs, 0).unwrap() {
            ColorModel::Indexed { base, lookup } => {
                assert_eq!(base, IndexedBase::Rgb);
                assert_eq!(lookup.len(), 6);
            }
            other => panic!("unexpected model: {other:?}"),
        }
    }
}
