//! Storage-filter classification for image XObjects.

use lopdf::{Dictionary, Document, Object};

/// The filter families the pipeline distinguishes, resolved once per image
/// at the document boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// CCITTFaxDecode.
    Bilevel,
    /// DCTDecode.
    Dct,
    /// FlateDecode wrapping a raw raster.
    Deflate,
    /// An array of two or more filters.
    CompoundArray,
    /// A filter the codec cannot handle (JBIG2Decode, JPXDecode, ...).
    Unsupported,
    /// No `Filter` entry: raw samples, handled like the fax family.
    Absent,
}

fn kind_of_name(name: &[u8]) -> FilterKind {
    match name {
        b"CCITTFaxDecode" => FilterKind::Bilevel,
        b"DCTDecode" => FilterKind::Dct,
        b"FlateDecode" => FilterKind::Deflate,
        _ => FilterKind::Unsupported,
    }
}

/// Resolve the `Filter` entry of an image stream dictionary.
///
/// A single-element array counts as that one filter; only arrays with two
/// or more entries classify as [`FilterKind::CompoundArray`].
pub fn resolve_filter(doc: &Document, dict: &Dictionary) -> FilterKind {
    let entry = match dict.get(b"Filter") {
        Ok(obj) => obj,
        Err(_) => return FilterKind::Absent,
    };
    resolve_object(doc, entry, 0)
}

fn resolve_object(doc: &Document, obj: &Object, depth: u8) -> FilterKind {
    if depth > 4 {
        return FilterKind::Unsupported;
    }
    match obj {
        Object::Name(name) => kind_of_name(name),
        Object::Array(items) => match items.len() {
            0 => FilterKind::Absent,
            1 => resolve_object(doc, &items[0], depth + 1),
            _ => FilterKind::CompoundArray,
        },
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(resolved) => resolve_object(doc, resolved, depth + 1),
            Err(_) => FilterKind::Unsupported,
        },
        _ => FilterKind::Unsupported,
    }
}

/// The full filter chain as resolved names, outermost first. Used to
/// unwrap compound arrays layer by layer.
pub fn filter_chain(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let mut chain = Vec::new();
    let Ok(entry) = dict.get(b"Filter") else {
        return chain;
    };
    push_names(doc, entry, &mut chain, 0);
    chain
}

fn push_names(doc: &Document, obj: &Object, chain: &mut Vec<Vec<u8>>, depth: u8) {
    if depth > 4 {
        return;
    }
    match obj {
        Object::Name(name) => chain.push(name.clone()),
        Object::Array(items) => {
            for item in items {
                push_names(doc, item, chain, depth + 1);
            }
        }
        Object::Reference(id) => {
            if let Ok(resolved) = doc.get_object(*id) {
                push_names(doc, resolved, chain, depth + 1);
            }
        }
        _ => {}
    }
}
