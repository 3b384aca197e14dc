use std::fs;
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, Stream, dictionary};
use redline_pdf::TextMeasure;
use redline_pdf::model::DiffPayload;
use serde_json::{Value, json};

/// Output directory: tests/output/<case>/
pub fn out_dir(case: &str) -> PathBuf {
    let dir = PathBuf::from("tests/output").join(case);
    fs::create_dir_all(&dir).expect("create output dir");
    dir
}

/// Minimal valid PDF with one page per (width, height) entry and a small
/// stroked line as content.
pub fn write_base_pdf(path: &Path, dims: &[(f32, f32)]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(dims.len());
    for (w, h) in dims {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"0.5 w 20 20 m 200 20 l S\n".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(*w),
                Object::Real(*h),
            ],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => dims.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path).expect("save base pdf");
}

pub fn payload_from(value: Value) -> DiffPayload {
    serde_json::from_value(value).expect("payload json")
}

/// Token map entry with a bbox of the given origin and size.
pub fn tok(page: u32, line: i32, seq: u32, text: &str, x: f32, y: f32, w: f32, h: f32) -> Value {
    json!({
        "page": page,
        "line_seq": line,
        "word_seq": seq,
        "token": text,
        "bbox": { "x_min": x, "y_min": y, "x_max": x + w, "y_max": y + h },
    })
}

/// Fixed-metrics font: every glyph is half the font size wide. Keeps the
/// layout tests independent of any installed font.
pub struct FixedMeasure;

impl TextMeasure for FixedMeasure {
    fn char_width(&self, _ch: char, size: f32) -> f32 {
        size * 0.5
    }

    fn ascent(&self, size: f32) -> f32 {
        size * 0.72
    }

    fn descent(&self, size: f32) -> f32 {
        size * -0.2
    }
}
