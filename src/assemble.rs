//! Merges overlay pages into the source documents.
//!
//! Source pages keep their original object identity: the overlay page
//! becomes a Form XObject drawn after the existing content, which is
//! wrapped in q/Q so a dangling CTM in the source stream cannot shift
//! the annotations. Continuation pages have no source counterpart and
//! are spliced in as whole pages.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::error::Error;

const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const INHERIT_DEPTH: usize = 32;

/// One page of the output document, in output order. The sequence is
/// aligned index-for-index with the overlay document's pages.
pub(crate) enum OutputPage {
    /// Overlay stamped onto this source page; `widen_by` grows the media
    /// box to the right to expose the comment margin.
    Stamped { base_index: usize, widen_by: f32 },
    /// Overlay page spliced in as-is (comment continuation pages).
    Inserted,
}

/// Width and height of every page, in order.
pub(crate) fn probe_page_dims(path: &Path) -> Result<Vec<(f32, f32)>, Error> {
    let doc = Document::load(path)?;
    if doc.is_encrypted() {
        return Err(Error::Invalid(format!(
            "encrypted PDF is not supported: {}",
            path.display()
        )));
    }
    let mut dims = Vec::new();
    for page_id in doc.get_pages().values() {
        let rect = effective_media_box(&doc, *page_id);
        dims.push((rect[2] - rect[0], rect[3] - rect[1]));
    }
    Ok(dims)
}

/// Stamp/splice the overlay document onto the base document and save.
pub(crate) fn compose(
    base_path: &Path,
    overlay_bytes: &[u8],
    plan: &[OutputPage],
    out_path: &Path,
) -> Result<(), Error> {
    let mut doc = Document::load(base_path)?;
    if doc.is_encrypted() {
        return Err(Error::Invalid(format!(
            "encrypted PDF is not supported: {}",
            base_path.display()
        )));
    }
    let base_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    let overlay = Document::load_mem(overlay_bytes)?;
    let overlay_ids = adopt_objects(&mut doc, overlay);
    if overlay_ids.len() != plan.len() {
        return Err(Error::Invalid(format!(
            "overlay has {} pages but the output plan lists {}",
            overlay_ids.len(),
            plan.len()
        )));
    }

    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(plan.len());

    for (idx, (entry, overlay_id)) in plan.iter().zip(&overlay_ids).enumerate() {
        let page_id = match entry {
            OutputPage::Stamped {
                base_index,
                widen_by,
            } => {
                let Some(base_id) = base_ids.get(*base_index).copied() else {
                    return Err(Error::Invalid(format!(
                        "output plan references page {} of a {}-page document",
                        base_index + 1,
                        base_ids.len()
                    )));
                };
                stamp_page(&mut doc, base_id, *overlay_id, idx, *widen_by)?;
                base_id
            }
            OutputPage::Inserted => *overlay_id,
        };
        let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
        page.set("Parent", Object::Reference(pages_id));
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => plan.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(out_path)?;
    log::debug!("Wrote {}: {} pages", out_path.display(), plan.len());
    Ok(())
}

/// Turn the overlay page into a Form XObject and draw it after the base
/// page's own content.
fn stamp_page(
    doc: &mut Document,
    base_id: ObjectId,
    overlay_id: ObjectId,
    idx: usize,
    widen_by: f32,
) -> Result<(), Error> {
    let overlay_page = doc.get_object(overlay_id).and_then(Object::as_dict)?.clone();
    let overlay_content = doc.get_page_content(overlay_id)?;
    let overlay_bbox = box_array(doc, &overlay_page, b"MediaBox").unwrap_or(LETTER);
    let overlay_resources = resources_object(doc, &overlay_page);

    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => rect_object(overlay_bbox),
            "Resources" => overlay_resources,
        },
        overlay_content,
    ));
    let form_name = format!("ANN_OVL_{}", idx + 1);

    let mut resources = inherited_resources(doc, base_id);
    let mut xobjects = xobject_dict(doc, &resources);
    xobjects.set(form_name.clone(), Object::Reference(form_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let existing = existing_contents(doc, base_id)?;
    let head_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let tail_id = doc.add_object(Stream::new(
        dictionary! {},
        format!("Q\nq /{form_name} Do Q\n").into_bytes(),
    ));
    let mut contents: Vec<Object> = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(head_id));
    contents.extend(existing);
    contents.push(Object::Reference(tail_id));

    let widened = if widen_by > 0.0 {
        let rect = effective_media_box(doc, base_id);
        Some([rect[0], rect[1], rect[2] + widen_by, rect[3]])
    } else {
        None
    };
    let pinned = inherited_page_attributes(doc, base_id)?;

    let page = doc.get_object_mut(base_id).and_then(Object::as_dict_mut)?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));
    for (key, value) in pinned {
        page.set(key, value);
    }
    if let Some(rect) = widened {
        // CropBox is pinned as well so an inherited crop cannot hide the
        // margin column.
        page.set("MediaBox", rect_object(rect));
        page.set("CropBox", rect_object(rect));
    }
    Ok(())
}

/// Inheritable attributes the page takes from its ancestors. The rebuilt
/// page tree is flat, so anything inherited has to move onto the page
/// itself or it is lost with the old tree.
fn inherited_page_attributes(
    doc: &Document,
    page_id: ObjectId,
) -> Result<Vec<(Vec<u8>, Object)>, Error> {
    let page = doc.get_dictionary(page_id)?;
    let mut pinned = Vec::new();
    for key in [b"MediaBox".as_slice(), b"CropBox", b"Rotate"] {
        if page.get(key).is_ok() {
            continue;
        }
        if let Some(value) = inherited_entry(doc, page_id, key) {
            pinned.push((key.to_vec(), value));
        }
    }
    Ok(pinned)
}

/// Look `key` up in the page's ancestors only.
fn inherited_entry(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc
        .get_dictionary(page_id)
        .ok()?
        .get(b"Parent")
        .ok()
        .and_then(|o| o.as_reference().ok());
    for _ in 0..INHERIT_DEPTH {
        let id = current?;
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(rid) => doc.get_object(*rid).ok().cloned(),
                other => Some(other.clone()),
            };
        }
        current = dict.get(b"Parent").ok().and_then(|o| o.as_reference().ok());
    }
    None
}

/// Move every object of `src` into `dst` under fresh ids and return the
/// renumbered page ids in page order.
fn adopt_objects(dst: &mut Document, mut src: Document) -> Vec<ObjectId> {
    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let page_ids: Vec<ObjectId> = src.get_pages().values().copied().collect();
    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    page_ids
}

/// The page's Contents entry as an array of stream references. An inline
/// stream is hoisted into its own object so it can sit in the array.
fn existing_contents(doc: &mut Document, page_id: ObjectId) -> Result<Vec<Object>, Error> {
    let entry = {
        let page = doc.get_dictionary(page_id)?;
        page.get(b"Contents").ok().cloned()
    };
    match entry {
        Some(Object::Reference(id)) => Ok(vec![Object::Reference(id)]),
        Some(Object::Array(items)) => Ok(items),
        Some(stream @ Object::Stream(_)) => {
            let id = doc.add_object(stream);
            Ok(vec![Object::Reference(id)])
        }
        _ => Ok(Vec::new()),
    }
}

fn number(doc: &Document, obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v),
        Object::Reference(id) => number(doc, doc.get_object(*id).ok()?),
        _ => None,
    }
}

fn box_array(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<[f32; 4]> {
    let arr = match dict.get(key).ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        Object::Array(a) => a,
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut rect = [0.0f32; 4];
    for (slot, item) in rect.iter_mut().zip(arr) {
        *slot = number(doc, item)?;
    }
    Some(rect)
}

fn rect_object(rect: [f32; 4]) -> Object {
    Object::Array(rect.iter().map(|v| Object::Real(*v)).collect())
}

/// MediaBox of the page, walking the Pages tree for inherited values.
fn effective_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let mut current = Some(page_id);
    for _ in 0..INHERIT_DEPTH {
        let Some(id) = current else { break };
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        if let Some(rect) = box_array(doc, dict, b"MediaBox") {
            return rect;
        }
        current = dict.get(b"Parent").ok().and_then(|o| o.as_reference().ok());
    }
    LETTER
}

/// Resources of the page, walking the Pages tree for inherited values.
/// Stamping writes a page-level Resources entry, which replaces rather
/// than extends an inherited one, so the inherited dict is copied down.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = Some(page_id);
    for _ in 0..INHERIT_DEPTH {
        let Some(id) = current else { break };
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(d)) => return d.clone(),
            Ok(Object::Reference(rid)) => {
                if let Ok(d) = doc.get_object(*rid).and_then(Object::as_dict) {
                    return d.clone();
                }
            }
            _ => {}
        }
        current = dict.get(b"Parent").ok().and_then(|o| o.as_reference().ok());
    }
    Dictionary::new()
}

fn resources_object(doc: &Document, page: &Dictionary) -> Object {
    match page.get(b"Resources") {
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .cloned()
            .unwrap_or_else(|_| Object::Dictionary(Dictionary::new())),
        Ok(Object::Dictionary(d)) => Object::Dictionary(d.clone()),
        _ => Object::Dictionary(Dictionary::new()),
    }
}

fn xobject_dict(doc: &Document, resources: &Dictionary) -> Dictionary {
    match resources.get(b"XObject") {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}
