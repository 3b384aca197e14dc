mod common;

use std::fs;
use std::path::PathBuf;

use redline_pdf::Error;

fn write_markup(name: &str, markup: &str) -> PathBuf {
    let path = common::out_dir("reconstruct").join(name);
    fs::write(&path, markup).expect("write markup");
    path
}

#[test]
fn words_join_without_separators() {
    let path = write_markup(
        "cjk.xhtml",
        r#"<doc><page width="595" height="842">
            <line>
                <word xMin="72.0" yMin="100.0" xMax="92.0" yMax="112.0">田中</word>
                <word xMin="92.0" yMin="100.0" xMax="112.0" yMax="112.0">太郎</word>
            </line>
        </page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.reconstructed_text, "田中太郎");
    assert_eq!(out.words.len(), 2);
    assert_eq!(out.words[0].word_seq, 0);
    assert_eq!(out.words[1].word_seq, 1);
    assert_eq!(out.words[0].page, 1);
    assert_eq!(out.words[0].line_seq, 0);
}

#[test]
fn line_changes_become_newlines() {
    let path = write_markup(
        "lines.xhtml",
        r#"<doc><page>
            <line><word>ab</word></line>
            <line><word>cd</word></line>
        </page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.reconstructed_text, "ab\ncd");
}

#[test]
fn page_breaks_join_silently() {
    // A word split across a page boundary reads back as one word.
    let path = write_markup(
        "pages.xhtml",
        r#"<doc>
            <page><line><word>hyphen</word></line></page>
            <page><line><word>ated</word></line></page>
        </doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.reconstructed_text, "hyphenated");
    assert_eq!(out.words[0].page, 1);
    assert_eq!(out.words[1].page, 2);
    // Line numbering and word numbering both restart on the new page.
    assert_eq!(out.words[1].line_seq, 0);
    assert_eq!(out.words[1].word_seq, 0);
}

#[test]
fn empty_word_elements_keep_their_slot() {
    let path = write_markup(
        "empty.xhtml",
        r#"<doc><page><line>
            <word>a</word><word/><word>b</word>
        </line></page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.reconstructed_text, "ab");
    assert_eq!(out.words.len(), 3);
    assert_eq!(out.words[1].text, "");
    assert_eq!(out.words[2].word_seq, 2);
}

#[test]
fn bbox_attributes_parse_in_either_case() {
    let path = write_markup(
        "bbox.xhtml",
        r#"<doc><page><line>
            <word xMin="10" yMin="20" xMax="30" yMax="40">camel</word>
            <word xmin="10" ymin="20" xmax="30" ymax="40">lower</word>
            <word xMin="10" yMin="20" xMax="30">short</word>
        </line></page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    let camel = out.words[0].bbox.expect("camel-case bbox");
    assert_eq!(camel.x_min, 10.0);
    assert_eq!(camel.y_max, 40.0);
    assert!(out.words[1].bbox.is_some());
    assert!(out.words[2].bbox.is_none());
}

#[test]
fn words_before_any_line_sit_on_line_minus_one() {
    let path = write_markup(
        "headless.xhtml",
        r#"<doc><page>
            <word>head</word>
            <line><word>body</word></line>
        </page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.words[0].line_seq, -1);
    assert_eq!(out.words[1].line_seq, 0);
    assert_eq!(out.reconstructed_text, "head\nbody");
}

#[test]
fn markup_entities_decode() {
    let path = write_markup(
        "entities.xhtml",
        r#"<doc><page><line><word>a&amp;b</word></line></page></doc>"#,
    );
    let out = redline_pdf::reconstruct(&path).expect("reconstruct");
    assert_eq!(out.reconstructed_text, "a&b");
}

#[test]
fn malformed_markup_is_an_error() {
    let path = write_markup("broken.xhtml", "<doc><page><word>unclosed");
    let err = redline_pdf::reconstruct(&path).expect_err("parse failure");
    assert!(matches!(err, Error::Markup(_)));
}

#[test]
fn missing_input_is_an_io_error() {
    let missing = common::out_dir("reconstruct").join("does-not-exist.xhtml");
    let err = redline_pdf::reconstruct(&missing).expect_err("missing file");
    assert!(matches!(err, Error::Io(_)));
}
