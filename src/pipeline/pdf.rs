//! lopdf plumbing shared by the PDF stages.
//!
//! Page attributes such as `/MediaBox` and `/Rotate` may live on any ancestor
//! node of the page tree. Every stage that rebuilds the tree first copies
//! those inherited values onto the page itself ([`flatten_pages`]) so that
//! the pages stay self-describing once they hang directly off the root node.

use super::blocking;
use crate::error::StepError;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::sync::Arc;

/// Attributes a page inherits from its ancestors (ISO 32000-1 §7.7.3.4).
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against `/Parent` cycles in broken files.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, for pages with no `/MediaBox` anywhere in their ancestry.
pub const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

pub async fn load(bytes: Arc<[u8]>) -> Result<Document, StepError> {
    blocking(move || Ok(Document::load_mem(&bytes)?)).await
}

pub async fn save(mut doc: Document, compress: bool) -> Result<Vec<u8>, StepError> {
    blocking(move || {
        if compress {
            doc.compress();
        }
        let mut buf = Vec::new();
        doc.save_to(&mut buf)?;
        Ok(buf)
    })
    .await
}

/// Page object ids in document order.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// Look `key` up on the page, then on each ancestor.
pub fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Copy inherited attributes onto the page dictionary itself.
pub fn materialize_inherited(doc: &mut Document, page_id: ObjectId) -> Result<(), StepError> {
    let page = doc.get_dictionary(page_id)?;
    let missing: Vec<(&[u8], Object)> = INHERITABLE
        .iter()
        .filter(|key| !page.has(key))
        .filter_map(|key| inherited(doc, page_id, key).map(|value| (*key, value)))
        .collect();

    let page = doc.get_dictionary_mut(page_id)?;
    for (key, value) in missing {
        page.set(key.to_vec(), value);
    }
    Ok(())
}

/// Page ids in document order, each carrying its inherited attributes.
pub fn flatten_pages(doc: &mut Document) -> Result<Vec<ObjectId>, StepError> {
    let ids = page_ids(doc);
    for &id in &ids {
        materialize_inherited(doc, id)?;
    }
    Ok(ids)
}

pub fn catalog_id(doc: &Document) -> Result<ObjectId, StepError> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

/// Root node of the page tree.
pub fn pages_root(doc: &Document) -> Result<ObjectId, StepError> {
    let catalog = doc.get_dictionary(catalog_id(doc)?)?;
    Ok(catalog.get(b"Pages")?.as_reference()?)
}

/// Hang `kids` directly off the root page-tree node, in order.
///
/// Pages must have been flattened first. Anything no longer reachable is
/// left for [`Document::prune_objects`].
pub fn set_page_tree(doc: &mut Document, kids: &[ObjectId]) -> Result<(), StepError> {
    let root = pages_root(doc)?;
    for &kid in kids {
        doc.get_dictionary_mut(kid)?.set("Parent", root);
    }
    let node = doc.get_dictionary_mut(root)?;
    node.set(
        "Kids",
        kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<Object>>(),
    );
    node.set("Count", kids.len() as i64);
    Ok(())
}

/// Swap the catalog for one that references nothing but the page tree.
///
/// Outlines, named destinations and forms point at pages that may no longer
/// exist; dropping them lets pruning remove those pages for real.
pub fn fresh_catalog(doc: &mut Document) -> Result<(), StepError> {
    let pages = pages_root(doc)?;
    let catalog = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages,
    });
    doc.trailer.set("Root", catalog);
    Ok(())
}

/// Shallow copy of a page dictionary as a new object (content is shared).
pub fn duplicate_page(doc: &mut Document, page_id: ObjectId) -> Result<ObjectId, StepError> {
    let copy = doc.get_dictionary(page_id)?.clone();
    Ok(doc.add_object(copy))
}

/// Numeric value of an integer or real object.
pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Follow a single reference, if `obj` is one.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Owned copy of a dictionary held directly or by reference.
pub fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    resolve(doc, obj)?.as_dict().ok().cloned()
}

/// The page's `/MediaBox`, normalised so that `[x0, y0]` is the lower-left corner.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| {
            let array = resolve(doc, &obj)?.as_array().ok()?;
            let v: Vec<f32> = array
                .iter()
                .filter_map(|o| resolve(doc, o).and_then(number))
                .collect();
            if v.len() != 4 {
                return None;
            }
            Some([v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3])])
        })
        .unwrap_or(DEFAULT_MEDIA_BOX)
}

/// Stored rotation of a page in degrees, including an inherited value.
pub fn rotation(doc: &Document, page_id: ObjectId) -> i64 {
    inherited(doc, page_id, b"Rotate")
        .and_then(|obj| resolve(doc, &obj).and_then(number))
        .map(|degrees| degrees.round() as i64)
        .unwrap_or(0)
}
