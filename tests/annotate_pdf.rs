mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{payload_from, tok, write_base_pdf};
use lopdf::{Document, Object};
use redline_pdf::{AnnotateRequest, Error, annotate};
use serde_json::json;

struct Outputs {
    a: PathBuf,
    b: PathBuf,
    comment: PathBuf,
}

fn outputs(dir: &Path) -> Outputs {
    Outputs {
        a: dir.join("ann_a.pdf"),
        b: dir.join("ann_b.pdf"),
        comment: dir.join("ann_comment.pdf"),
    }
}

fn request<'a>(sources: (&'a Path, &'a Path), out: &'a Outputs) -> AnnotateRequest<'a> {
    AnnotateRequest {
        source_a: sources.0,
        source_b: sources.1,
        output_a: &out.a,
        output_b: &out.b,
        output_comment: &out.comment,
        font_family: None,
    }
}

fn obj_to_f32(doc: &Document, obj: &Object) -> f32 {
    let obj = match obj {
        Object::Reference(id) => doc.get_object(*id).expect("deref"),
        other => other,
    };
    if let Ok(v) = obj.as_float() {
        return v;
    }
    obj.as_i64().map(|v| v as f32).expect("numeric box entry")
}

fn box_width(doc: &Document, page: lopdf::ObjectId, key: &[u8]) -> f32 {
    let dict = doc.get_dictionary(page).expect("page dict");
    let arr = match dict.get(key).expect("box entry") {
        Object::Array(a) => a.clone(),
        Object::Reference(id) => match doc.get_object(*id).expect("deref") {
            Object::Array(a) => a.clone(),
            _ => panic!("box is not an array"),
        },
        _ => panic!("box is not an array"),
    };
    obj_to_f32(doc, &arr[2]) - obj_to_f32(doc, &arr[0])
}

fn page_widths(path: &Path) -> Vec<f32> {
    let doc = Document::load(path).expect("load output");
    let pages = doc.get_pages();
    pages
        .values()
        .map(|&id| box_width(&doc, id, b"MediaBox"))
        .collect()
}

#[test]
fn annotates_all_three_documents() {
    let _ = env_logger::try_init();
    let dir = common::out_dir("annotate_basic");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    write_base_pdf(&src_a, &[(612.0, 792.0), (612.0, 792.0)]);
    write_base_pdf(&src_b, &[(612.0, 792.0), (612.0, 792.0)]);

    let payload = payload_from(json!({
        "map_a": [
            tok(1, 0, 0, "removed", 72.0, 100.0, 50.0, 12.0),
            tok(1, 0, 1, "kept", 130.0, 100.0, 30.0, 12.0),
            tok(1, 1, 2, "also", 72.0, 116.0, 30.0, 12.0),
        ],
        "map_b": [
            tok(2, 0, 0, "brand", 72.0, 100.0, 40.0, 12.0),
            tok(2, 0, 1, " ", 112.0, 100.0, 4.0, 12.0),
            tok(2, 0, 2, "new", 116.0, 100.0, 30.0, 12.0),
        ],
        "deleted_ranges": [[0, 0]],
        "added_ranges": [[0, 2]],
        "ops": [{ "type": "c", "a_start": 1, "a_end": 1, "b_start": 0, "b_end": 2 }],
    }));
    let out = outputs(&dir);
    let summary = annotate(&payload, &request((&src_a, &src_b), &out)).expect("annotate");

    assert_eq!(summary.input_deleted_tokens, 1);
    assert_eq!(summary.unique_deleted_draw_units, 1);
    assert_eq!(summary.input_added_tokens, 3);
    assert_eq!(summary.unique_added_draw_units, 3);
    assert_eq!(summary.comment_count, 1);
    assert_eq!(summary.map_a_missing, 0);
    assert_eq!(summary.map_b_missing, 0);
    assert_eq!(summary.min_comment_font_size, Some(9.0));
    assert_eq!(summary.comment_continuation_pages, 0);

    // A and B keep their page count and size.
    assert_eq!(page_widths(&out.a), vec![612.0, 612.0]);
    assert_eq!(page_widths(&out.b), vec![612.0, 612.0]);
    // The comment document is widened by the margin column on every page.
    assert_eq!(page_widths(&out.comment), vec![792.0, 792.0]);

    // Stamped pages draw the overlay through a form object.
    let doc = Document::load(&out.a).expect("load output");
    let first = *doc.get_pages().get(&1).expect("page 1");
    let content = doc.get_page_content(first).expect("page content");
    let text = String::from_utf8_lossy(&content);
    assert!(text.contains("/ANN_OVL_1 Do"));
    assert!(text.starts_with("q\n"));
}

#[test]
fn widened_pages_pin_the_crop_box() {
    let dir = common::out_dir("annotate_crop");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    write_base_pdf(&src_a, &[(500.0, 700.0)]);
    write_base_pdf(&src_b, &[(500.0, 700.0)]);

    let out = outputs(&dir);
    annotate(
        &payload_from(json!({})),
        &request((&src_a, &src_b), &out),
    )
    .expect("annotate");

    let doc = Document::load(&out.comment).expect("load output");
    let first = *doc.get_pages().get(&1).expect("page 1");
    assert_eq!(box_width(&doc, first, b"MediaBox"), 680.0);
    assert_eq!(box_width(&doc, first, b"CropBox"), 680.0);
}

#[test]
fn empty_payload_still_produces_the_margin_column() {
    let dir = common::out_dir("annotate_empty");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    write_base_pdf(&src_a, &[(612.0, 792.0)]);
    write_base_pdf(&src_b, &[(612.0, 792.0)]);

    let out = outputs(&dir);
    let summary = annotate(
        &payload_from(json!({})),
        &request((&src_a, &src_b), &out),
    )
    .expect("annotate");

    assert_eq!(summary.comment_count, 0);
    assert_eq!(summary.min_comment_font_size, None);
    assert_eq!(summary.comment_continuation_pages, 0);
    assert_eq!(page_widths(&out.a), vec![612.0]);
    assert_eq!(page_widths(&out.comment), vec![792.0]);
}

#[test]
fn overflowing_comments_insert_continuation_pages() {
    let _ = env_logger::try_init();
    let dir = common::out_dir("annotate_overflow");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    write_base_pdf(&src_a, &[(612.0, 792.0), (612.0, 792.0)]);
    write_base_pdf(&src_b, &[(612.0, 792.0)]);

    // 25 long comments anchored down page 1, one per line so none merge.
    let long = "m".repeat(300);
    let map_a: Vec<serde_json::Value> = (0..25)
        .map(|i| tok(1, i, i as u32, "w", 72.0, 30.0 + 28.0 * i as f32, 30.0, 12.0))
        .collect();
    let map_b: Vec<serde_json::Value> = (0..25)
        .map(|i| tok(1, 0, i, &long, 72.0, 100.0, 400.0, 12.0))
        .collect();
    let ops: Vec<serde_json::Value> = (0..25)
        .map(|i| json!({ "type": "c", "a_start": i, "a_end": i, "b_start": i, "b_end": i }))
        .collect();
    let payload = payload_from(json!({ "map_a": map_a, "map_b": map_b, "ops": ops }));

    let out = outputs(&dir);
    let summary = annotate(&payload, &request((&src_a, &src_b), &out)).expect("annotate");

    assert_eq!(summary.comment_count, 25);
    assert_eq!(summary.min_comment_font_size, Some(5.0));
    assert!(summary.comment_continuation_pages > 0);

    let widths = page_widths(&out.comment);
    assert_eq!(widths.len(), 2 + summary.comment_continuation_pages);
    assert!(widths.iter().all(|&w| (w - 792.0).abs() < 0.01));

    // The base documents are untouched by comment pagination.
    assert_eq!(page_widths(&out.a).len(), 2);
    assert_eq!(page_widths(&out.b).len(), 1);
}

#[test]
fn comments_past_the_last_page_do_not_render() {
    let dir = common::out_dir("annotate_outofrange");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    write_base_pdf(&src_a, &[(612.0, 792.0)]);
    write_base_pdf(&src_b, &[(612.0, 792.0)]);

    let payload = payload_from(json!({
        "map_a": [tok(99, 0, 0, "ghost", 72.0, 100.0, 30.0, 12.0)],
        "map_b": [tok(1, 0, 0, "text", 72.0, 100.0, 30.0, 12.0)],
        "ops": [{ "type": "a", "a_start": 0, "a_end": 0, "b_start": 0, "b_end": 0 }],
    }));
    let out = outputs(&dir);
    let summary = annotate(&payload, &request((&src_a, &src_b), &out)).expect("annotate");

    // The comment exists in the plan but its page is not in the document.
    assert_eq!(summary.comment_count, 1);
    assert_eq!(summary.comment_continuation_pages, 0);
    assert_eq!(page_widths(&out.comment).len(), 1);
}

#[test]
fn unreadable_sources_are_errors() {
    let dir = common::out_dir("annotate_badsrc");
    let src_a = dir.join("a.pdf");
    let src_b = dir.join("b.pdf");
    fs::write(&src_a, "not a pdf").expect("write garbage");
    write_base_pdf(&src_b, &[(612.0, 792.0)]);

    let out = outputs(&dir);
    let err = annotate(
        &payload_from(json!({})),
        &request((&src_a, &src_b), &out),
    )
    .expect_err("load failure");
    assert!(matches!(err, Error::Pdf(_)));
}
