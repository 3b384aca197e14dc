mod assemble;
mod error;
mod fonts;
mod markup;
pub mod model;
mod overlay;
pub mod plan;

pub use error::Error;
pub use fonts::TextMeasure;
pub use model::{DiffPayload, ReconstructOutput, RunSummary};

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use assemble::OutputPage;
use fonts::AnnotFont;
use plan::DrawPlan;
use plan::margin::{MARGIN_WIDTH, PageGeometry, layout_page_margin};

/// Characters the renderer draws besides the comment texts themselves:
/// marker prefixes, badge digits and continuation labels.
const CHROME_CHARS: &str = "[] page comments (continued 0123456789)";

pub struct AnnotateRequest<'a> {
    pub source_a: &'a Path,
    pub source_b: &'a Path,
    pub output_a: &'a Path,
    pub output_b: &'a Path,
    pub output_comment: &'a Path,
    pub font_family: Option<&'a str>,
}

/// Render the three annotated documents and return the run summary.
pub fn annotate(payload: &DiffPayload, request: &AnnotateRequest) -> Result<RunSummary, Error> {
    let t0 = Instant::now();

    let mut summary = RunSummary::default();
    let plans = plan::build_draw_plans(payload, &mut summary);
    let t_plan = t0.elapsed();

    let mut used_chars: HashSet<char> = CHROME_CHARS.chars().collect();
    for page_plan in plans.doc_comment.values() {
        for ann in &page_plan.comments {
            used_chars.extend(ann.text.chars());
        }
    }
    let font = AnnotFont::resolve(request.font_family, &used_chars);
    let t_font = t0.elapsed();

    render_plain(request.source_a, request.output_a, &plans.doc_a, &font)?;
    render_plain(request.source_b, request.output_b, &plans.doc_b, &font)?;
    render_comment_doc(
        request.source_a,
        request.output_comment,
        &plans.doc_comment,
        &font,
        &mut summary,
    )?;
    let t_total = t0.elapsed();

    log::info!(
        "Timing: plan={:.1}ms, fonts={:.1}ms, render={:.1}ms, total={:.1}ms ({} comments)",
        t_plan.as_secs_f64() * 1000.0,
        (t_font - t_plan).as_secs_f64() * 1000.0,
        (t_total - t_font).as_secs_f64() * 1000.0,
        t_total.as_secs_f64() * 1000.0,
        summary.comment_count,
    );

    Ok(summary)
}

/// Read a positioned-word markup file and rebuild its plain text.
pub fn reconstruct(input: &Path) -> Result<ReconstructOutput, Error> {
    let t0 = Instant::now();

    let markup = std::fs::read_to_string(input).map_err(Error::Io)?;
    let out = markup::reconstruct_str(&markup)?;

    log::info!(
        "Timing: reconstruct={:.1}ms ({} words)",
        t0.elapsed().as_secs_f64() * 1000.0,
        out.words.len(),
    );

    Ok(out)
}

/// Strikes or marks stamped onto every page, page size unchanged.
fn render_plain(
    source: &Path,
    output: &Path,
    plans: &DrawPlan,
    font: &AnnotFont,
) -> Result<(), Error> {
    let dims = assemble::probe_page_dims(source)?;
    let mut builder = overlay::OverlayBuilder::new(font);
    let mut output_plan = Vec::with_capacity(dims.len());
    for (i, (w, h)) in dims.iter().enumerate() {
        let page_no = (i + 1) as u32;
        builder.render_page(*w, *h, plans.get(&page_no), None);
        output_plan.push(OutputPage::Stamped {
            base_index: i,
            widen_by: 0.0,
        });
    }
    assemble::compose(source, &builder.finish(), &output_plan, output)
}

/// Strikes plus the margin comment column; every page is widened by the
/// margin width and continuation pages follow their source page.
fn render_comment_doc(
    source: &Path,
    output: &Path,
    plans: &DrawPlan,
    font: &AnnotFont,
    summary: &mut RunSummary,
) -> Result<(), Error> {
    let dims = assemble::probe_page_dims(source)?;
    let mut builder = overlay::OverlayBuilder::new(font);
    let mut output_plan = Vec::with_capacity(dims.len());
    for (i, (w, h)) in dims.iter().enumerate() {
        let page_no = (i + 1) as u32;
        let page_plan = plans.get(&page_no);
        let geometry = PageGeometry {
            width: *w,
            height: *h,
        };
        let out_w = w + MARGIN_WIDTH;

        let layout = page_plan.and_then(|p| layout_page_margin(page_no, &p.comments, geometry, font));
        let Some(margin) = layout else {
            builder.render_page(out_w, *h, page_plan, None);
            output_plan.push(OutputPage::Stamped {
                base_index: i,
                widen_by: MARGIN_WIDTH,
            });
            continue;
        };

        if let Some((first, rest)) = margin.pages.split_first() {
            builder.render_page(out_w, *h, page_plan, Some((first, margin.line_step)));
            output_plan.push(OutputPage::Stamped {
                base_index: i,
                widen_by: MARGIN_WIDTH,
            });
            for cont in rest {
                builder.render_page(out_w, *h, None, Some((cont, margin.line_step)));
                output_plan.push(OutputPage::Inserted);
            }
        }

        summary.min_comment_font_size = Some(match summary.min_comment_font_size {
            Some(cur) => cur.min(margin.font_size),
            None => margin.font_size,
        });
        summary.comment_continuation_pages += margin.continuation_pages();
    }
    assemble::compose(source, &builder.finish(), &output_plan, output)
}
