mod comments;
pub mod margin;

use std::collections::{BTreeMap, HashSet};

pub use comments::{CommentAnnotation, build_comment_annotations};

use crate::model::{Bbox, DiffPayload, RunSummary, TokenRecord};

/// A resolved drawable word: which page it sits on and where.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawUnit {
    pub page: u32,
    pub word_seq: Option<u32>,
    pub bbox: Bbox,
}

/// What draw-unit family a key belongs to. Strikes and marks on the same
/// word must not collapse into one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawKind {
    Deleted,
    Added,
}

/// Everything drawn on one page. All three lists are always present; a page
/// missing from the plan simply has nothing to draw.
#[derive(Clone, Debug, Default)]
pub struct PagePlan {
    pub strikes: Vec<DrawUnit>,
    pub marks: Vec<DrawUnit>,
    pub comments: Vec<CommentAnnotation>,
}

/// Per-document draw plan keyed by 1-based page number.
pub type DrawPlan = BTreeMap<u32, PagePlan>;

/// Expand inclusive `[start, end]` ranges into token indices. Entries with
/// the wrong arity or `end < start` are dropped without error.
pub fn range_indices(ranges: &[Vec<i64>]) -> Vec<i64> {
    let mut out = Vec::new();
    for pair in ranges {
        let [start, end] = pair.as_slice() else {
            continue;
        };
        if end < start {
            continue;
        }
        out.extend(*start..=*end);
    }
    out
}

/// Resolve token indices against a word-position index. Out-of-bounds
/// indices, null entries, and bbox-less entries count as misses.
pub fn resolve_units(
    index: &[Option<TokenRecord>],
    indices: &[i64],
    missing: &mut usize,
) -> Vec<DrawUnit> {
    let mut out = Vec::new();
    for &idx in indices {
        let entry = usize::try_from(idx).ok().and_then(|i| index.get(i));
        match entry {
            Some(Some(TokenRecord {
                page,
                word_seq,
                bbox: Some(bbox),
                ..
            })) => out.push(DrawUnit {
                page: *page,
                word_seq: *word_seq,
                bbox: *bbox,
            }),
            _ => *missing += 1,
        }
    }
    out
}

#[derive(PartialEq, Eq, Hash)]
enum UnitKey {
    WordSeq(DrawKind, u32, u32),
    Quantized(DrawKind, u32, (i64, i64, i64, i64)),
}

/// Drop repeated draw units, first occurrence wins. Units keyed by word
/// sequence when present, otherwise by the quantized bbox.
pub fn dedupe_units(units: Vec<DrawUnit>, kind: DrawKind, skipped: &mut usize) -> Vec<DrawUnit> {
    let mut seen: HashSet<UnitKey> = HashSet::new();
    let mut uniq = Vec::with_capacity(units.len());
    for unit in units {
        let key = match unit.word_seq {
            Some(seq) => UnitKey::WordSeq(kind, unit.page, seq),
            None => UnitKey::Quantized(kind, unit.page, unit.bbox.quantized()),
        };
        if seen.insert(key) {
            uniq.push(unit);
        } else {
            *skipped += 1;
        }
    }
    uniq
}

/// The three per-document draw plans for one annotate run.
pub struct DrawPlans {
    pub doc_a: DrawPlan,
    pub doc_b: DrawPlan,
    pub doc_comment: DrawPlan,
}

/// Resolve the whole payload into draw plans, filling the summary counters
/// as it goes. Strikes land on A and the comment document, marks on B,
/// comment annotations on the comment document only.
pub fn build_draw_plans(payload: &DiffPayload, summary: &mut RunSummary) -> DrawPlans {
    let deleted_indices = range_indices(&payload.deleted_ranges);
    let added_indices = range_indices(&payload.added_ranges);
    summary.input_deleted_tokens = deleted_indices.len();
    summary.input_added_tokens = added_indices.len();

    let deleted = resolve_units(&payload.map_a, &deleted_indices, &mut summary.map_a_missing);
    let added = resolve_units(&payload.map_b, &added_indices, &mut summary.map_b_missing);

    let deleted = dedupe_units(deleted, DrawKind::Deleted, &mut summary.skipped_duplicates);
    let added = dedupe_units(added, DrawKind::Added, &mut summary.skipped_duplicates);
    summary.unique_deleted_draw_units = deleted.len();
    summary.unique_added_draw_units = added.len();

    let comments = build_comment_annotations(&payload.ops, &payload.map_a, &payload.map_b, summary);
    summary.comment_count = comments.len();

    let mut plans = DrawPlans {
        doc_a: DrawPlan::new(),
        doc_b: DrawPlan::new(),
        doc_comment: DrawPlan::new(),
    };
    for unit in deleted {
        plans
            .doc_a
            .entry(unit.page)
            .or_default()
            .strikes
            .push(unit.clone());
        plans
            .doc_comment
            .entry(unit.page)
            .or_default()
            .strikes
            .push(unit);
    }
    for unit in added {
        plans.doc_b.entry(unit.page).or_default().marks.push(unit);
    }
    for ann in comments {
        plans
            .doc_comment
            .entry(ann.page)
            .or_default()
            .comments
            .push(ann);
    }
    plans
}
