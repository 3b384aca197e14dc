use std::collections::HashMap;

use roxmltree::Document;

use crate::error::Error;
use crate::model::{Bbox, ReconstructOutput, Word};

/// Walk the extractor's bbox markup in document order and collect every word
/// with its page position. `page` elements number from 1, `line_seq` restarts
/// at -1 per page (the first line element brings it to 0), `word_seq` counts
/// word elements per page.
pub(crate) fn parse_words(markup: &str) -> Result<Vec<Word>, Error> {
    let doc = Document::parse(markup)?;

    let mut words: Vec<Word> = Vec::new();
    let mut page: u32 = 0;
    let mut line_seq: i32 = -1;
    let mut word_seq_by_page: HashMap<u32, u32> = HashMap::new();

    for node in doc.descendants().filter(|n| n.is_element()) {
        let tag = node.tag_name().name();
        if tag.eq_ignore_ascii_case("page") {
            page += 1;
            line_seq = -1;
        } else if tag.eq_ignore_ascii_case("line") {
            line_seq += 1;
        } else if tag.eq_ignore_ascii_case("word") {
            let text: String = node
                .children()
                .filter(|c| c.is_text())
                .filter_map(|c| c.text())
                .collect();
            let seq = word_seq_by_page.entry(page).or_insert(0);
            let word_seq = *seq;
            *seq += 1;
            words.push(Word {
                page,
                line_seq,
                word_seq,
                text,
                bbox: word_bbox(&node),
            });
        }
    }

    Ok(words)
}

/// Bbox attributes appear as `xMin`/`yMin`/... or all-lowercase depending on
/// the extractor version. Any missing or unparseable value means no bbox.
fn word_bbox(node: &roxmltree::Node) -> Option<Bbox> {
    let attr = |name: &str| -> Option<f32> {
        node.attributes()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .and_then(|a| a.value().trim().parse::<f32>().ok())
    };
    Some(Bbox {
        x_min: attr("xMin")?,
        y_min: attr("yMin")?,
        x_max: attr("xMax")?,
        y_max: attr("yMax")?,
    })
}

/// Join word texts back into plain text. Words concatenate directly; a line
/// change within the same page becomes a newline; a page change inserts
/// nothing, so a sentence can flow across a page break.
pub(crate) fn join_words(words: &[Word]) -> String {
    let mut out = String::new();
    let mut prev: Option<(u32, i32)> = None;
    for word in words {
        if let Some((prev_page, prev_line)) = prev
            && prev_page == word.page
            && prev_line != word.line_seq
        {
            out.push('\n');
        }
        out.push_str(&word.text);
        prev = Some((word.page, word.line_seq));
    }
    out
}

pub(crate) fn reconstruct_str(markup: &str) -> Result<ReconstructOutput, Error> {
    let words = parse_words(markup)?;
    Ok(ReconstructOutput {
        reconstructed_text: join_words(&words),
        words,
    })
}

/// Decode the HTML entities that survive in diff tokens. Named references
/// beyond the XML five plus `nbsp` are left untouched.
pub(crate) fn unescape_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            out.push_str(rest);
            return out;
        };
        let entity = &rest[1..end];
        match decode_entity(entity) {
            Some(ch) => out.push(ch),
            None => out.push_str(&rest[..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = if let Some(hex) = digits.strip_prefix('x').or(digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                digits.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}
