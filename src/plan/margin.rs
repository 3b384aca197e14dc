use std::collections::VecDeque;

use crate::fonts::TextMeasure;
use crate::model::Bbox;
use crate::plan::CommentAnnotation;

/// Width of the comment column appended to the right of every page of the
/// comment document.
pub const MARGIN_WIDTH: f32 = 180.0;

const MARGIN_PAD_X: f32 = 10.0;
const MARGIN_PAD_TOP: f32 = 18.0;
const MARGIN_PAD_BOTTOM: f32 = 18.0;
/// Text inset from the box edges; the renderer clips text to the box.
pub(crate) const BOX_PAD_X: f32 = 4.0;
pub(crate) const BOX_PAD_Y: f32 = 4.0;
const BOX_GAP: f32 = 6.0;

const FONT_START: f32 = 9.0;
const FONT_FLOOR: f32 = 5.0;
const FONT_STEP: f32 = 0.5;

/// Base page size in points, before the margin column is appended.
#[derive(Clone, Copy, Debug)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
}

/// Box rectangle in PDF coordinates; `y` is the bottom edge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoxRect {
    pub fn top(&self) -> f32 {
        self.y + self.h
    }
}

/// One laid-out comment box.
#[derive(Clone, Debug)]
pub struct LayoutPlacement {
    pub marker: u32,
    /// Anchor bbox in page-top-origin coordinates; absent on continuation
    /// parts, which draw no badge.
    pub anchor: Option<Bbox>,
    pub lines: Vec<String>,
    pub rect: BoxRect,
    pub font_size: f32,
    pub continued: bool,
}

/// One overlay page worth of placements. The first page of a layout sits on
/// the source page itself; later ones are inserted continuation pages.
#[derive(Clone, Debug, Default)]
pub struct PageLayout {
    pub placements: Vec<LayoutPlacement>,
    pub label: Option<String>,
}

/// Result of laying out one source page's comments.
#[derive(Clone, Debug)]
pub struct MarginLayout {
    pub font_size: f32,
    pub line_step: f32,
    pub pages: Vec<PageLayout>,
}

impl MarginLayout {
    pub fn continuation_pages(&self) -> usize {
        self.pages.len().saturating_sub(1)
    }
}

/// Baseline-to-baseline distance at a given size. The floor keeps cramped
/// sizes readable when a face reports a small glyph height.
fn line_step(measure: &dyn TextMeasure, size: f32) -> f32 {
    (measure.glyph_height(size) + 1.0).max(size + 2.0)
}

fn box_height(line_count: usize, step: f32) -> f32 {
    2.0 * BOX_PAD_Y + line_count as f32 * step
}

/// A comment waiting to be placed, wrapped at the current trial size.
struct PendingComment {
    marker: u32,
    anchor: Option<Bbox>,
    lines: Vec<String>,
    continued: bool,
}

impl PendingComment {
    fn into_placement(self, top: f32, box_x: f32, box_w: f32, step: f32, size: f32) -> LayoutPlacement {
        let h = box_height(self.lines.len(), step);
        LayoutPlacement {
            marker: self.marker,
            anchor: self.anchor,
            lines: self.lines,
            rect: BoxRect {
                x: box_x,
                y: top - h,
                w: box_w,
                h,
            },
            font_size: size,
            continued: self.continued,
        }
    }
}

/// Wrap by accumulated code-point width. A single code point wider than the
/// line still takes a line of its own, so wrapping always makes progress.
fn wrap_label(label: &str, measure: &dyn TextMeasure, size: f32, max_width: f32) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut cur_w = 0.0;
    for ch in label.chars() {
        let w = measure.char_width(ch, size);
        if cur_w + w > max_width && !cur.is_empty() {
            lines.push(std::mem::take(&mut cur));
            cur_w = 0.0;
        }
        cur.push(ch);
        cur_w += w;
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Order the page's comments by anchor position (top of page first) and
/// assign 1-based marker IDs, one per distinct anchor key; comments sharing
/// an anchor word share its ID.
fn ordered_markers(comments: &[CommentAnnotation]) -> Vec<(u32, &CommentAnnotation)> {
    let mut order: Vec<&CommentAnnotation> = comments.iter().collect();
    order.sort_by(|a, b| {
        a.bbox
            .y_min
            .total_cmp(&b.bbox.y_min)
            .then_with(|| a.bbox.x_min.total_cmp(&b.bbox.x_min))
            .then_with(|| a.word_seq.cmp(&b.word_seq))
    });

    let mut out = Vec::with_capacity(order.len());
    let mut keys: Vec<(u32, Option<u32>)> = Vec::new();
    for ann in order {
        let key = (ann.page, ann.word_seq);
        let marker = match keys.iter().position(|k| *k == key) {
            Some(pos) => pos as u32 + 1,
            None => {
                keys.push(key);
                keys.len() as u32
            }
        };
        out.push((marker, ann));
    }
    out
}

fn build_pending(
    ordered: &[(u32, &CommentAnnotation)],
    measure: &dyn TextMeasure,
    size: f32,
    text_width: f32,
) -> Vec<PendingComment> {
    ordered
        .iter()
        .map(|&(marker, ann)| PendingComment {
            marker,
            anchor: Some(ann.bbox),
            lines: wrap_label(&format!("[{}] {}", marker, ann.text), measure, size, text_width),
            continued: false,
        })
        .collect()
}

/// Preferred top edge: centered on the anchor when there is one, clamped to
/// the column cursor so boxes never overlap. Clamping, not reflow.
fn preferred_top(pending: &PendingComment, box_h: f32, cursor: f32, geometry: PageGeometry) -> f32 {
    match pending.anchor {
        Some(bbox) if !pending.continued => {
            (bbox.center_y_pdf(geometry.height) + box_h / 2.0).min(cursor)
        }
        _ => cursor,
    }
}

/// Sizing-pass placement: every box must fit the base page's column or the
/// trial size is rejected.
fn place_strict(
    pending: &[PendingComment],
    geometry: PageGeometry,
    step: f32,
    size: f32,
) -> Option<Vec<LayoutPlacement>> {
    let box_x = geometry.width + MARGIN_PAD_X;
    let box_w = MARGIN_WIDTH - 2.0 * MARGIN_PAD_X;
    let mut cursor = geometry.height - MARGIN_PAD_TOP;
    let mut placements = Vec::with_capacity(pending.len());

    for pc in pending {
        let box_h = box_height(pc.lines.len(), step);
        let top = preferred_top(pc, box_h, cursor, geometry);
        let bottom = top - box_h;
        if bottom < MARGIN_PAD_BOTTOM {
            return None;
        }
        placements.push(LayoutPlacement {
            marker: pc.marker,
            anchor: pc.anchor,
            lines: pc.lines.clone(),
            rect: BoxRect {
                x: box_x,
                y: bottom,
                w: box_w,
                h: box_h,
            },
            font_size: size,
            continued: pc.continued,
        });
        cursor = bottom - BOX_GAP;
    }
    Some(placements)
}

/// Floor-size placement: fill pages greedily top-down, splitting a box at
/// the largest line count that fits and carrying the tail to a continuation
/// page. A fresh page always accepts at least one line, so the queue always
/// shrinks and the loop terminates.
fn place_overflow(
    page_no: u32,
    pending: Vec<PendingComment>,
    geometry: PageGeometry,
    step: f32,
    size: f32,
) -> Vec<PageLayout> {
    let box_x = geometry.width + MARGIN_PAD_X;
    let box_w = MARGIN_WIDTH - 2.0 * MARGIN_PAD_X;
    let mut queue: VecDeque<PendingComment> = pending.into();
    let mut pages: Vec<PageLayout> = Vec::new();

    while !queue.is_empty() {
        let on_base_page = pages.is_empty();
        let mut cursor = geometry.height - MARGIN_PAD_TOP;
        let mut placements: Vec<LayoutPlacement> = Vec::new();

        while let Some(mut pc) = queue.pop_front() {
            if pc.lines.is_empty() {
                continue;
            }
            let box_h = box_height(pc.lines.len(), step);
            let top = if on_base_page {
                preferred_top(&pc, box_h, cursor, geometry)
            } else {
                // Continuation pages stack top-down; the anchor lives on the
                // source page and must not leak into these placements.
                pc.anchor = None;
                cursor
            };
            let avail = top - MARGIN_PAD_BOTTOM;

            if box_h <= avail {
                placements.push(pc.into_placement(top, box_x, box_w, step, size));
                cursor = top - box_h - BOX_GAP;
                continue;
            }

            let mut lines_fit = ((avail - 2.0 * BOX_PAD_Y) / step).floor().max(0.0) as usize;
            if lines_fit == 0 {
                if placements.is_empty() {
                    // Page shorter than one line of text: force a line
                    // through anyway rather than spinning forever.
                    lines_fit = 1;
                } else {
                    queue.push_front(pc);
                    break;
                }
            }

            if lines_fit >= pc.lines.len() {
                // Forced whole box on a too-short page.
                placements.push(pc.into_placement(top, box_x, box_w, step, size));
                break;
            }

            let tail = pc.lines.split_off(lines_fit);
            let marker = pc.marker;
            placements.push(pc.into_placement(top, box_x, box_w, step, size));
            queue.push_front(PendingComment {
                marker,
                anchor: None,
                lines: tail,
                continued: true,
            });
            break;
        }

        let label = if on_base_page {
            None
        } else {
            Some(format!("page {} comments (continued {})", page_no, pages.len()))
        };
        pages.push(PageLayout { placements, label });
    }

    if pages.is_empty() {
        pages.push(PageLayout::default());
    }
    pages
}

/// Lay out one source page's comments into the margin column.
///
/// Pass one tries sizes from `FONT_START` down to `FONT_FLOOR` in
/// `FONT_STEP` decrements, accepting the first size at which every box fits
/// the base page. If the floor still overflows, pass two lays out at the
/// floor and spills onto continuation pages. Returns `None` when the page
/// has no comments.
pub fn layout_page_margin(
    page_no: u32,
    comments: &[CommentAnnotation],
    geometry: PageGeometry,
    measure: &dyn TextMeasure,
) -> Option<MarginLayout> {
    if comments.is_empty() {
        return None;
    }
    let ordered = ordered_markers(comments);
    let text_width = MARGIN_WIDTH - 2.0 * MARGIN_PAD_X - 2.0 * BOX_PAD_X;

    let mut size = FONT_START;
    loop {
        let step = line_step(measure, size);
        let pending = build_pending(&ordered, measure, size, text_width);
        if let Some(placements) = place_strict(&pending, geometry, step, size) {
            return Some(MarginLayout {
                font_size: size,
                line_step: step,
                pages: vec![PageLayout {
                    placements,
                    label: None,
                }],
            });
        }
        if size <= FONT_FLOOR {
            break;
        }
        size = (size - FONT_STEP).max(FONT_FLOOR);
    }

    let step = line_step(measure, FONT_FLOOR);
    let pending = build_pending(&ordered, measure, FONT_FLOOR, text_width);
    let pages = place_overflow(page_no, pending, geometry, step, FONT_FLOOR);
    Some(MarginLayout {
        font_size: FONT_FLOOR,
        line_step: step,
        pages,
    })
}
