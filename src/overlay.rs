//! Overlay document rendering.
//!
//! Annotations are drawn into a standalone single-purpose PDF, one overlay
//! page per output page. The assembler later stamps each overlay onto its
//! source page (or inserts it wholesale for continuation pages), so the
//! source document's own content streams are never touched.

use std::collections::HashSet;

use miniz_oxide::deflate::compress_to_vec_zlib;
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use crate::fonts::{AnnotFont, RegisteredFont, TextMeasure};
use crate::model::Bbox;
use crate::plan::margin::{BOX_PAD_X, BOX_PAD_Y, LayoutPlacement, PageLayout};
use crate::plan::{DrawUnit, PagePlan};

const FONT_NAME: &[u8] = b"F1";
/// Stroke alpha for deletion strikes.
const GS_STRIKE: &[u8] = b"GS1";
/// Stroke and fill alpha shared by insertion marks, comment boxes and badges.
const GS_SOLID: &[u8] = b"GS2";

const STRIKE_COLOR: [f32; 3] = [0.86, 0.10, 0.10];
const STRIKE_ALPHA: f32 = 0.9;
const STRIKE_WIDTH: f32 = 1.2;

const MARK_COLOR: [f32; 3] = [0.12, 0.45, 0.12];
const MARK_WIDTH: f32 = 0.8;
/// Zero-area bboxes still get a visible sliver of a rectangle.
const MARK_MIN_EXTENT: f32 = 0.8;

const BOX_STROKE_COLOR: [f32; 3] = [0.10, 0.20, 0.80];
const BOX_FILL_COLOR: [f32; 3] = [1.0, 1.0, 0.80];
const SOLID_ALPHA: f32 = 0.95;

const TEXT_COLOR: [f32; 3] = [0.05, 0.05, 0.05];
const LABEL_GRAY: f32 = 0.35;
const LABEL_SIZE: f32 = 8.0;

const ANCHOR_DOT_RADIUS: f32 = 1.3;
const BADGE_RADIUS: f32 = 4.6;
const BADGE_FONT_SIZE: f32 = 5.5;
const BADGE_OFFSET: f32 = 7.0;
const CONNECTOR_WIDTH: f32 = 0.6;

/// Kappa for approximating a quarter circle with one cubic Bezier.
const CIRCLE_K: f32 = 0.552_284_75;

struct OverlayPage {
    width: f32,
    height: f32,
    content: Content,
}

/// Accumulates overlay pages and serializes them as one PDF.
pub(crate) struct OverlayBuilder<'a> {
    pdf: Pdf,
    next_ref: i32,
    catalog_id: Ref,
    pages_id: Ref,
    font: &'a AnnotFont,
    registered: RegisteredFont,
    gs_strike: Ref,
    gs_solid: Ref,
    pages: Vec<OverlayPage>,
}

impl<'a> OverlayBuilder<'a> {
    pub(crate) fn new(font: &'a AnnotFont) -> OverlayBuilder<'a> {
        let mut pdf = Pdf::new();
        let mut next_ref = 1;
        let mut alloc = || {
            let id = Ref::new(next_ref);
            next_ref += 1;
            id
        };
        let catalog_id = alloc();
        let pages_id = alloc();
        let registered = font.register(&mut pdf, &mut alloc);
        let gs_strike = alloc();
        let gs_solid = alloc();
        pdf.ext_graphics(gs_strike).stroking_alpha(STRIKE_ALPHA);
        pdf.ext_graphics(gs_solid)
            .stroking_alpha(SOLID_ALPHA)
            .non_stroking_alpha(SOLID_ALPHA);
        OverlayBuilder {
            pdf,
            next_ref,
            catalog_id,
            pages_id,
            font,
            registered,
            gs_strike,
            gs_solid,
            pages: Vec::new(),
        }
    }

    fn alloc(&mut self) -> Ref {
        let id = Ref::new(self.next_ref);
        self.next_ref += 1;
        id
    }

    /// Draw one overlay page. `plan` carries the strikes and marks for a
    /// source page; `margin` carries one layout page of comment boxes plus
    /// the line step they were measured with. Continuation pages pass no
    /// plan, source pages without annotations pass neither and come out
    /// blank.
    pub(crate) fn render_page(
        &mut self,
        width: f32,
        height: f32,
        plan: Option<&PagePlan>,
        margin: Option<(&PageLayout, f32)>,
    ) {
        let mut content = Content::new();

        if let Some(plan) = plan {
            if !plan.strikes.is_empty() {
                draw_strikes(&mut content, &plan.strikes, height);
            }
            if !plan.marks.is_empty() {
                draw_marks(&mut content, &plan.marks, height);
            }
        }

        if let Some((layout, step)) = margin {
            if let Some(label) = &layout.label {
                self.draw_label(&mut content, label, height);
            }
            let mut badged: HashSet<u32> = HashSet::new();
            for placement in &layout.placements {
                if let Some(anchor) = &placement.anchor
                    && !placement.continued
                    && badged.insert(placement.marker)
                {
                    self.draw_badge(&mut content, placement.marker, anchor, width, height);
                }
                self.draw_comment_box(&mut content, placement, step);
            }
        }

        self.pages.push(OverlayPage {
            width,
            height,
            content,
        });
    }

    /// Filled, stroked box with the wrapped label text clipped inside it.
    fn draw_comment_box(&self, content: &mut Content, placement: &LayoutPlacement, step: f32) {
        let r = &placement.rect;
        let [sr, sg, sb] = BOX_STROKE_COLOR;
        let [fr, fg, fb] = BOX_FILL_COLOR;

        content.save_state();
        content.set_parameters(Name(GS_SOLID));
        content.set_stroke_rgb(sr, sg, sb);
        content.set_fill_rgb(fr, fg, fb);
        content.set_line_width(1.0);
        content.rect(r.x, r.y, r.w, r.h);
        content.fill_nonzero_and_stroke();
        content.restore_state();

        content.save_state();
        content.rect(r.x, r.y, r.w, r.h);
        content.clip_nonzero();
        content.end_path();
        let [tr, tg, tb] = TEXT_COLOR;
        content.set_fill_rgb(tr, tg, tb);
        content.begin_text();
        content.set_font(Name(FONT_NAME), placement.font_size);
        content.next_line(r.x + BOX_PAD_X, r.top() - BOX_PAD_Y - placement.font_size);
        let mut first = true;
        for line in &placement.lines {
            if !first {
                content.next_line(0.0, -step);
            }
            first = false;
            content.show(Str(&self.registered.encode(line)));
        }
        content.end_text();
        content.restore_state();
    }

    /// Numbered circle next to the anchor word, tied to it by a short
    /// connector and a dot on the word's edge.
    fn draw_badge(
        &self,
        content: &mut Content,
        marker: u32,
        anchor: &Bbox,
        width: f32,
        height: f32,
    ) {
        let (_, _, x1, _) = anchor.to_pdf(height);
        let ax = (x1 + 2.0).min(width - 8.0);
        let ay = anchor.center_y_pdf(height).clamp(8.0, height - 8.0);
        let bx = (ax + BADGE_OFFSET).min(width - BADGE_RADIUS - 1.0);
        let by = (ay + BADGE_OFFSET).min(height - BADGE_RADIUS - 1.0);
        let [sr, sg, sb] = BOX_STROKE_COLOR;

        content.save_state();
        content.set_parameters(Name(GS_SOLID));
        content.set_stroke_rgb(sr, sg, sb);
        content.set_fill_rgb(sr, sg, sb);
        content.set_line_width(CONNECTOR_WIDTH);
        content.move_to(ax, ay);
        content.line_to(bx, by);
        content.stroke();
        circle_path(content, ax, ay, ANCHOR_DOT_RADIUS);
        content.fill_nonzero_and_stroke();
        content.set_fill_rgb(1.0, 1.0, 1.0);
        content.set_line_width(0.8);
        circle_path(content, bx, by, BADGE_RADIUS);
        content.fill_nonzero_and_stroke();
        content.restore_state();

        let digits = marker.to_string();
        let tw = self.font.string_width(&digits, BADGE_FONT_SIZE);
        content.set_fill_rgb(sr, sg, sb);
        content.begin_text();
        content.set_font(Name(FONT_NAME), BADGE_FONT_SIZE);
        content.next_line(bx - tw / 2.0, by - 0.35 * BADGE_FONT_SIZE);
        content.show(Str(&self.registered.encode(&digits)));
        content.end_text();
    }

    fn draw_label(&self, content: &mut Content, text: &str, height: f32) {
        content.save_state();
        content.set_fill_gray(LABEL_GRAY);
        content.begin_text();
        content.set_font(Name(FONT_NAME), LABEL_SIZE);
        content.next_line(24.0, height - 24.0);
        content.show(Str(&self.registered.encode(text)));
        content.end_text();
        content.restore_state();
    }

    /// Serialize all accumulated pages into the overlay PDF bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let pages = std::mem::take(&mut self.pages);
        let mut placed: Vec<(f32, f32, Ref)> = Vec::with_capacity(pages.len());
        for page in pages {
            let content_id = self.alloc();
            let raw = page.content.finish();
            let compressed = compress_to_vec_zlib(raw.as_slice(), 6);
            self.pdf
                .stream(content_id, &compressed)
                .filter(Filter::FlateDecode);
            placed.push((page.width, page.height, content_id));
        }

        let page_ids: Vec<Ref> = placed.iter().map(|_| self.alloc()).collect();
        self.pdf.catalog(self.catalog_id).pages(self.pages_id);
        self.pdf
            .pages(self.pages_id)
            .kids(page_ids.iter().copied())
            .count(page_ids.len() as i32);

        for (page_id, (width, height, content_id)) in page_ids.iter().zip(&placed) {
            let mut page = self.pdf.page(*page_id);
            page.media_box(Rect::new(0.0, 0.0, *width, *height));
            page.parent(self.pages_id);
            page.contents(*content_id);
            let mut resources = page.resources();
            resources
                .fonts()
                .pair(Name(FONT_NAME), self.registered.font_ref);
            let mut states = resources.ext_g_states();
            states.pair(Name(GS_STRIKE), self.gs_strike);
            states.pair(Name(GS_SOLID), self.gs_solid);
        }

        log::debug!("Overlay serialized: {} pages", placed.len());
        self.pdf.finish()
    }
}

/// Horizontal line through the vertical middle of each deleted word.
fn draw_strikes(content: &mut Content, units: &[DrawUnit], page_h: f32) {
    let [r, g, b] = STRIKE_COLOR;
    content.save_state();
    content.set_parameters(Name(GS_STRIKE));
    content.set_stroke_rgb(r, g, b);
    content.set_line_width(STRIKE_WIDTH);
    for unit in units {
        let (x0, y0, x1, y1) = unit.bbox.to_pdf(page_h);
        let y = (y0 + y1) / 2.0;
        content.move_to(x0, y);
        content.line_to(x1, y);
        content.stroke();
    }
    content.restore_state();
}

/// Outline rectangle around each inserted word.
fn draw_marks(content: &mut Content, units: &[DrawUnit], page_h: f32) {
    let [r, g, b] = MARK_COLOR;
    content.save_state();
    content.set_parameters(Name(GS_SOLID));
    content.set_stroke_rgb(r, g, b);
    content.set_line_width(MARK_WIDTH);
    for unit in units {
        let (x0, y0, x1, y1) = unit.bbox.to_pdf(page_h);
        content.rect(
            x0,
            y0,
            (x1 - x0).max(MARK_MIN_EXTENT),
            (y1 - y0).max(MARK_MIN_EXTENT),
        );
        content.stroke();
    }
    content.restore_state();
}

fn circle_path(content: &mut Content, cx: f32, cy: f32, r: f32) {
    let k = CIRCLE_K * r;
    content.move_to(cx + r, cy);
    content.cubic_to(cx + r, cy + k, cx + k, cy + r, cx, cy + r);
    content.cubic_to(cx - k, cy + r, cx - r, cy + k, cx - r, cy);
    content.cubic_to(cx - r, cy - k, cx - k, cy - r, cx, cy - r);
    content.cubic_to(cx + k, cy - r, cx + r, cy - k, cx + r, cy);
    content.close_path();
}
