use std::collections::HashSet;

use crate::markup::unescape_entities;
use crate::model::{Bbox, DiffOp, OpKind, RunSummary, TokenRecord};

/// Placeholder token emitted by the diff aligner; never rendered.
pub(crate) const SENTINEL: &str = "<$>";

/// Two annotations on the same line merge when the horizontal gap between
/// their anchors is at most this many points.
const MERGE_GAP: f32 = 8.0;

/// A comment attached to a word in document A, carrying text from document B.
/// The anchor bbox is a private copy; merging unions it freely.
#[derive(Clone, Debug)]
pub struct CommentAnnotation {
    pub page: u32,
    pub line_seq: i32,
    pub word_seq: Option<u32>,
    pub bbox: Bbox,
    pub text: String,
    pub b_start: i64,
    pub b_end: i64,
}

/// Concatenate the B-side tokens of an inclusive span. Null entries, empty
/// tokens, and sentinels drop out; entities decode; the result is trimmed.
fn span_text(map_b: &[Option<TokenRecord>], b_start: i64, b_end: i64) -> String {
    let mut out = String::new();
    for idx in b_start..=b_end {
        let Ok(idx) = usize::try_from(idx) else {
            continue;
        };
        let Some(Some(record)) = map_b.get(idx) else {
            continue;
        };
        if record.token.is_empty() || record.token == SENTINEL {
            continue;
        }
        out.push_str(&unescape_entities(&record.token));
    }
    out.trim().to_owned()
}

/// Nearest A-side word with a bbox, tried in a fixed candidate order:
/// span start, span end, one before the start, one past the end. The order
/// is a documented contract; tests depend on it.
fn nearest_anchor<'a>(
    op: &DiffOp,
    map_a: &'a [Option<TokenRecord>],
) -> Option<(&'a TokenRecord, Bbox)> {
    let candidates = [
        op.a_start,
        op.a_end,
        Some(op.a_start.unwrap_or(0) - 1),
        Some(op.a_end.unwrap_or(0) + 1),
    ];
    for idx in candidates.into_iter().flatten() {
        let Ok(idx) = usize::try_from(idx) else {
            continue;
        };
        if let Some(Some(record)) = map_a.get(idx)
            && let Some(bbox) = record.bbox
        {
            return Some((record, bbox));
        }
    }
    None
}

/// Build comment annotations for insert/change ops: derive the text from the
/// B span, anchor it in A, dedupe, then merge same-line neighbors.
pub fn build_comment_annotations(
    ops: &[DiffOp],
    map_a: &[Option<TokenRecord>],
    map_b: &[Option<TokenRecord>],
    summary: &mut RunSummary,
) -> Vec<CommentAnnotation> {
    let mut annotations: Vec<CommentAnnotation> = Vec::new();

    for op in ops {
        if !matches!(op.kind, OpKind::Insert | OpKind::Change) {
            continue;
        }
        let b_start = op.b_start.unwrap_or(-1);
        let b_end = op.b_end.unwrap_or(-1);
        if b_start < 0 || b_end < b_start {
            continue;
        }
        let text = span_text(map_b, b_start, b_end);
        if text.is_empty() {
            continue;
        }
        let Some((anchor, bbox)) = nearest_anchor(op, map_a) else {
            summary.map_a_missing += 1;
            continue;
        };
        annotations.push(CommentAnnotation {
            page: anchor.page,
            line_seq: anchor.line_seq,
            word_seq: anchor.word_seq,
            bbox,
            text,
            b_start,
            b_end,
        });
    }

    let mut seen: HashSet<(u32, Option<u32>, i64, i64, String)> = HashSet::new();
    let mut uniq: Vec<CommentAnnotation> = Vec::new();
    for ann in annotations {
        let key = (
            ann.page,
            ann.word_seq,
            ann.b_start,
            ann.b_end,
            ann.text.clone(),
        );
        if seen.insert(key) {
            uniq.push(ann);
        } else {
            summary.skipped_duplicates += 1;
        }
    }

    merge_line_neighbors(uniq, map_b, summary)
}

/// Fold runs of annotations sitting close together on the same line into one
/// annotation per run: union the anchors, widen the B span, re-derive the
/// text from the widened span.
fn merge_line_neighbors(
    mut annotations: Vec<CommentAnnotation>,
    map_b: &[Option<TokenRecord>],
    summary: &mut RunSummary,
) -> Vec<CommentAnnotation> {
    annotations.sort_by(|a, b| {
        (a.page, a.line_seq, a.word_seq)
            .cmp(&(b.page, b.line_seq, b.word_seq))
            .then_with(|| a.bbox.x_min.total_cmp(&b.bbox.x_min))
    });

    let mut merged: Vec<CommentAnnotation> = Vec::new();
    let mut members: Vec<usize> = Vec::new();
    for ann in annotations {
        if let Some(last) = merged.last_mut()
            && last.page == ann.page
            && last.line_seq == ann.line_seq
            && ann.bbox.x_min - last.bbox.x_max <= MERGE_GAP
        {
            last.bbox = last.bbox.union(&ann.bbox);
            last.word_seq = match (last.word_seq, ann.word_seq) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            };
            last.b_start = last.b_start.min(ann.b_start);
            last.b_end = last.b_end.max(ann.b_end);
            if let Some(count) = members.last_mut() {
                *count += 1;
            }
        } else {
            merged.push(ann);
            members.push(1);
        }
    }

    let mut out = Vec::with_capacity(merged.len());
    for (mut ann, count) in merged.into_iter().zip(members) {
        if count > 1 {
            summary.merged_comment_groups += 1;
            ann.text = span_text(map_b, ann.b_start, ann.b_end);
            if ann.text.is_empty() {
                continue;
            }
        }
        out.push(ann);
    }
    out
}
