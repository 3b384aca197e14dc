use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// Word bounding box in page points, top-left origin (y grows downward).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl Bbox {
    /// (x0, y0, x1, y1) in PDF coordinates (bottom-left origin), y0 <= y1.
    pub fn to_pdf(&self, page_h: f32) -> (f32, f32, f32, f32) {
        (
            self.x_min,
            page_h - self.y_max,
            self.x_max,
            page_h - self.y_min,
        )
    }

    /// Vertical center in PDF coordinates.
    pub fn center_y_pdf(&self, page_h: f32) -> f32 {
        page_h - (self.y_min + self.y_max) / 2.0
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Coordinates quantized to one decimal, for hashing near-equal boxes.
    pub fn quantized(&self) -> (i64, i64, i64, i64) {
        let q = |v: f32| (v * 10.0).round() as i64;
        (q(self.x_min), q(self.y_min), q(self.x_max), q(self.y_max))
    }
}

/// A word placed on a page, as produced by layout reconstruction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Word {
    pub page: u32,
    pub line_seq: i32,
    pub word_seq: u32,
    pub text: String,
    pub bbox: Option<Bbox>,
}

/// Entry of a word-position index. Index arrays may hold nulls; a null or
/// bbox-less entry is treated as a miss, not an error.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_line_seq")]
    pub line_seq: i32,
    #[serde(default)]
    pub word_seq: Option<u32>,
    #[serde(default)]
    pub token: String,
    #[serde(default, deserialize_with = "lenient_bbox")]
    pub bbox: Option<Bbox>,
}

fn default_line_seq() -> i32 {
    -1
}

/// Diff operation kind. Payloads use the single-letter forms; the long
/// spellings are accepted as aliases. Unknown kinds parse as `Other` and are
/// ignored downstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum OpKind {
    #[serde(rename = "a", alias = "insert")]
    Insert,
    #[serde(rename = "c", alias = "change")]
    Change,
    #[serde(rename = "d", alias = "delete")]
    Delete,
    #[serde(rename = "e", alias = "equal")]
    Equal,
    #[default]
    #[serde(other)]
    Other,
}

/// One aligned diff operation with optional token spans on either side.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiffOp {
    #[serde(rename = "type", default)]
    pub kind: OpKind,
    #[serde(default)]
    pub a_start: Option<i64>,
    #[serde(default)]
    pub a_end: Option<i64>,
    #[serde(default)]
    pub b_start: Option<i64>,
    #[serde(default)]
    pub b_end: Option<i64>,
}

/// The diff payload: per-document word-position indexes, the index ranges to
/// strike (A) and mark (B), and the aligned ops driving comment generation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiffPayload {
    #[serde(default)]
    pub map_a: Vec<Option<TokenRecord>>,
    #[serde(default)]
    pub map_b: Vec<Option<TokenRecord>>,
    #[serde(default)]
    pub deleted_ranges: Vec<Vec<i64>>,
    #[serde(default)]
    pub added_ranges: Vec<Vec<i64>>,
    #[serde(default)]
    pub ops: Vec<DiffOp>,
}

impl DiffPayload {
    pub fn from_path(path: &Path) -> Result<DiffPayload, Error> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Output of `reconstruct`: the joined plain text plus every word with its
/// page position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconstructOutput {
    pub reconstructed_text: String,
    pub words: Vec<Word>,
}

/// Counters reported after an annotate run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub skipped_duplicates: usize,
    pub map_a_missing: usize,
    pub map_b_missing: usize,
    pub merged_comment_groups: usize,
    pub input_deleted_tokens: usize,
    pub input_added_tokens: usize,
    pub unique_deleted_draw_units: usize,
    pub unique_added_draw_units: usize,
    pub comment_count: usize,
    pub min_comment_font_size: Option<f32>,
    pub comment_continuation_pages: usize,
}

/// Bbox fields that fail to parse degrade to a missing bbox rather than
/// failing the whole payload.
fn lenient_bbox<'de, D>(de: D) -> Result<Option<Bbox>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(de)?;
    let Some(serde_json::Value::Object(map)) = value else {
        return Ok(None);
    };
    let coord = |key: &str| -> Option<f32> {
        match map.get(key) {
            Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| v as f32),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f32>().ok(),
            _ => None,
        }
    };
    Ok(
        match (coord("x_min"), coord("y_min"), coord("x_max"), coord("y_max")) {
            (Some(x_min), Some(y_min), Some(x_max), Some(y_max)) => Some(Bbox {
                x_min,
                y_min,
                x_max,
                y_max,
            }),
            _ => None,
        },
    )
}
