//! Page walker: drives the per-image recompression pass across the page
//! tree, the content-stream fallback, and the cleanup pass.

use std::collections::HashSet;

use log::{debug, info, warn};
use lopdf::Document;

use crate::document::{
    image_filter, page_xobject_table, read_source_image, recompress_page_content,
    remove_annotations, replace_image,
};
use crate::error::Result;
use crate::strategy::{self, Outcome};

/// Counters for one document run.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub pages: usize,
    /// Strategy invocations that ran to completion, replaced or skipped.
    /// Cleanup only fires when this stays zero.
    pub images_processed: usize,
    pub images_replaced: usize,
    pub images_skipped: usize,
    pub recoverable_faults: usize,
    /// Pages without image XObjects whose content streams were
    /// recompressed instead.
    pub fallback_pages: usize,
    pub cleanup_applied: bool,
}

/// Walk every page in order and recompress what the strategies accept.
///
/// A fault in one image skips that image and nothing else. When no
/// strategy invocation in the whole document ran to completion, the
/// cleanup pass drops annotations and prunes unreferenced objects
/// instead.
pub fn process_document(
    doc: &mut Document,
    document_name: &str,
    quality_override: Option<f32>,
) -> Result<RunStats> {
    let pages = doc.get_pages();
    let mut stats = RunStats {
        pages: pages.len(),
        ..RunStats::default()
    };
    info!("\"{document_name}\": {} pages", stats.pages);

    // An image shared by several pages gets exactly one pass per run.
    let mut processed = HashSet::new();

    for (page_no, page_id) in pages {
        let entries = match page_xobject_table(doc, page_id) {
            Some(entries) if !entries.is_empty() => entries,
            // Nothing to recompress on this page; rewrite its content
            // streams at best compression instead.
            _ => {
                let rewritten = recompress_page_content(doc, page_id)?;
                debug!(
                    "\"{document_name}\" page {page_no}: no image XObjects, \
                     {rewritten} content streams recompressed"
                );
                stats.fallback_pages += 1;
                continue;
            }
        };

        for entry in entries {
            let Some(target) = entry.target else {
                continue;
            };
            if !processed.insert(target) {
                continue;
            }
            let Some(filter) = image_filter(doc, target) else {
                continue;
            };
            let Some((kind, params)) = strategy::select(filter, document_name, quality_override)
            else {
                warn!(
                    "\"{document_name}\" page {page_no}: /{} has an unsupported filter, \
                     leaving it as is",
                    entry.name
                );
                stats.images_skipped += 1;
                continue;
            };

            let result = read_source_image(doc, target).and_then(|source| {
                let outcome = strategy::compress(&source, kind, params)?;
                Ok((source, outcome))
            });
            match result {
                Ok((source, Outcome::Replaced { image, mask })) => {
                    let mask = mask.map(|m| (source.smask.as_ref().map(|s| s.id), m));
                    replace_image(doc, target, image, mask);
                    stats.images_processed += 1;
                    stats.images_replaced += 1;
                }
                Ok((_, Outcome::Skipped(reason))) => {
                    debug!(
                        "\"{document_name}\" page {page_no}: /{} skipped: {reason}",
                        entry.name
                    );
                    stats.images_processed += 1;
                    stats.images_skipped += 1;
                }
                Err(fault) => {
                    warn!(
                        "\"{document_name}\" page {page_no}: recoverable image fault on /{}: {fault}",
                        entry.name
                    );
                    stats.recoverable_faults += 1;
                }
            }
        }
    }

    if stats.images_processed == 0 {
        let removed = remove_annotations(doc);
        let before = doc.objects.len();
        doc.prune_objects();
        let pruned = before - doc.objects.len();
        info!(
            "\"{document_name}\": no strategy ran, cleanup removed {removed} \
             annotations and pruned {pruned} objects"
        );
        stats.cleanup_applied = true;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    #[test]
    fn page_without_images_takes_the_fallback_path() {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Object::Stream(Stream::new(
            dictionary! {},
            b"q Q".to_vec(),
        )));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
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

        let stats = process_document(&mut doc, "blank.pdf", None).unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.fallback_pages, 1);
        assert_eq!(stats.images_replaced, 0);
        assert!(stats.cleanup_applied);
    }
}
