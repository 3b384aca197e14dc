use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use memmap2::Mmap;
use pdf_writer::{Name, Pdf, Rect, Ref};
use ttf_parser::Face;

/// Metrics the layout engine needs from a font. Kept as a trait so layout
/// tests can run against a fixed-width stub.
pub trait TextMeasure {
    fn char_width(&self, ch: char, size: f32) -> f32;
    fn ascent(&self, size: f32) -> f32;
    /// Negative, per font convention.
    fn descent(&self, size: f32) -> f32;

    fn string_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|ch| self.char_width(ch, size)).sum()
    }

    fn glyph_height(&self, size: f32) -> f32 {
        self.ascent(size) - self.descent(size)
    }
}

enum FontSource {
    /// Raw file bytes plus the face index within a collection.
    File {
        family: String,
        data: Vec<u8>,
        face_index: u32,
    },
    /// Built-in Helvetica with WinAnsi encoding; nothing to embed.
    Helvetica,
}

/// The single annotation font for a run, resolved up front so layout can
/// measure before any PDF object exists.
pub(crate) struct AnnotFont {
    source: FontSource,
    widths_1000: Vec<f32>,
    char_widths_1000: HashMap<char, f32>,
    ascender_ratio: f32,
    descender_ratio: f32,
}

/// Helvetica vertical metrics from the AFM.
const HELVETICA_ASCENDER: f32 = 0.718;
const HELVETICA_DESCENDER: f32 = -0.207;

impl TextMeasure for AnnotFont {
    /// Per-char cache first (covers every Unicode char seen in the run),
    /// WinAnsi table as fallback.
    fn char_width(&self, ch: char, size: f32) -> f32 {
        if let Some(&w) = self.char_widths_1000.get(&ch) {
            return w * size / 1000.0;
        }
        let byte = char_to_winansi(ch);
        if byte >= 32 {
            self.widths_1000[(byte - 32) as usize] * size / 1000.0
        } else {
            0.0
        }
    }

    fn ascent(&self, size: f32) -> f32 {
        self.ascender_ratio * size
    }

    fn descent(&self, size: f32) -> f32 {
        self.descender_ratio * size
    }
}

impl AnnotFont {
    /// Resolve the annotation font: find and load `family` from the system
    /// font directories, or fall back to built-in Helvetica. `used_chars` is
    /// every character the overlays will draw; it bounds the width cache and
    /// later the embedded subset.
    pub(crate) fn resolve(family: Option<&str>, used_chars: &HashSet<char>) -> AnnotFont {
        if let Some(name) = family {
            if let Some(font) = Self::from_file(name, used_chars) {
                return font;
            }
            log::warn!("Font not found: {name} — using Helvetica");
        }
        Self::helvetica(used_chars)
    }

    fn helvetica(used_chars: &HashSet<char>) -> AnnotFont {
        let unmappable = used_chars
            .iter()
            .filter(|&&ch| ch != ' ' && char_to_winansi(ch) == 0)
            .count();
        if unmappable > 0 {
            log::warn!(
                "{unmappable} character(s) outside WinAnsi will not render; \
                 pass --font with a family that covers them"
            );
        }
        AnnotFont {
            source: FontSource::Helvetica,
            widths_1000: helvetica_widths(),
            char_widths_1000: HashMap::new(),
            ascender_ratio: HELVETICA_ASCENDER,
            descender_ratio: HELVETICA_DESCENDER,
        }
    }

    fn from_file(family: &str, used_chars: &HashSet<char>) -> Option<AnnotFont> {
        let (path, face_index) = find_font_file(family)?;
        let data = std::fs::read(&path).ok()?;
        let face = Face::parse(&data, face_index).ok()?;

        let units = face.units_per_em() as f32;
        let widths_1000: Vec<f32> = (32u8..=255u8)
            .map(|byte| {
                face.glyph_index(winansi_to_char(byte))
                    .and_then(|gid| face.glyph_hor_advance(gid))
                    .map(|adv| adv as f32 / units * 1000.0)
                    .unwrap_or(0.0)
            })
            .collect();
        let mut char_widths_1000 = HashMap::new();
        for &ch in used_chars {
            if let Some(gid) = face.glyph_index(ch) {
                let w = face
                    .glyph_hor_advance(gid)
                    .map(|adv| adv as f32 / units * 1000.0)
                    .unwrap_or(0.0);
                char_widths_1000.insert(ch, w);
            }
        }
        let ascender_ratio = face.ascender() as f32 / units;
        let descender_ratio = face.descender() as f32 / units;

        log::info!("Annotation font: {family} ({})", path.display());
        Some(AnnotFont {
            source: FontSource::File {
                family: family.to_owned(),
                data,
                face_index,
            },
            widths_1000,
            char_widths_1000,
            ascender_ratio,
            descender_ratio,
        })
    }

    /// Write the font objects into the overlay PDF and return the handle the
    /// content streams encode against.
    pub(crate) fn register(
        &self,
        pdf: &mut Pdf,
        alloc: &mut impl FnMut() -> Ref,
    ) -> RegisteredFont {
        let font_ref = alloc();
        match &self.source {
            FontSource::Helvetica => {
                pdf.type1_font(font_ref)
                    .base_font(Name(b"Helvetica"))
                    .encoding_predefined(Name(b"WinAnsiEncoding"));
                RegisteredFont {
                    font_ref,
                    char_to_gid: None,
                }
            }
            FontSource::File {
                family,
                data,
                face_index,
            } => match embed_truetype(pdf, font_ref, family, data, *face_index,
                                      &self.char_widths_1000, alloc)
            {
                Some(char_to_gid) => RegisteredFont {
                    font_ref,
                    char_to_gid: Some(char_to_gid),
                },
                None => {
                    log::warn!("Embedding failed for {family} — using Helvetica");
                    pdf.type1_font(font_ref)
                        .base_font(Name(b"Helvetica"))
                        .encoding_predefined(Name(b"WinAnsiEncoding"));
                    RegisteredFont {
                        font_ref,
                        char_to_gid: None,
                    }
                }
            },
        }
    }
}

/// A font already written into a PDF: the ref for page resources and the
/// encoder for show-text strings.
pub(crate) struct RegisteredFont {
    pub(crate) font_ref: Ref,
    char_to_gid: Option<HashMap<char, u16>>,
}

impl RegisteredFont {
    /// Bytes for a PDF string operand: big-endian glyph IDs for an embedded
    /// CID font, WinAnsi bytes otherwise.
    pub(crate) fn encode(&self, text: &str) -> Vec<u8> {
        match &self.char_to_gid {
            Some(map) => encode_as_gids(text, map),
            None => to_winansi_bytes(text),
        }
    }
}

fn font_family_name(face: &Face) -> Option<String> {
    // ID 1 (Family) distinguishes "Aptos Display" from "Aptos"; ID 16 groups
    // them under one name and collides.
    for name in face.names() {
        if name.name_id == ttf_parser::name_id::FAMILY
            && name.is_unicode()
            && let Some(s) = name.to_string()
        {
            return Some(s);
        }
    }
    None
}

fn font_directories() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    // 1. User-configured directories via REDLINE_FONTS env var
    if let Ok(val) = std::env::var("REDLINE_FONTS") {
        let sep = if cfg!(windows) { ';' } else { ':' };
        for part in val.split(sep) {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                dirs.push(PathBuf::from(trimmed));
            }
        }
    }

    // 2. Platform-specific system font directories
    #[cfg(target_os = "macos")]
    {
        dirs.extend([
            "/Library/Fonts".into(),
            "/System/Library/Fonts".into(),
            "/System/Library/Fonts/Supplemental".into(),
        ]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.extend(["/usr/share/fonts".into(), "/usr/local/share/fonts".into()]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        } else {
            dirs.push("C:\\Windows\\Fonts".into());
        }
    }

    dirs
}

fn is_font_file(path: &std::path::Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("ttf" | "otf" | "ttc")
    )
}

fn is_font_collection(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ttc"))
}

/// Search the font directories for a face whose family matches, preferring
/// the regular weight; any styled variant serves as a fallback.
fn find_font_file(family: &str) -> Option<(PathBuf, u32)> {
    let t0 = std::time::Instant::now();
    let wanted = family.to_lowercase();
    let mut styled_fallback: Option<(PathBuf, u32)> = None;
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut files_scanned = 0u32;

    let mut stack = font_directories();
    while let Some(dir) = stack.pop() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if !is_font_file(&path) {
                continue;
            }
            files_scanned += 1;
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let Ok(data) = (unsafe { Mmap::map(&file) }) else {
                continue;
            };
            let face_count = if is_font_collection(&path) {
                ttf_parser::fonts_in_collection(&data).unwrap_or(1)
            } else {
                1
            };
            for face_index in 0..face_count {
                let Ok(face) = Face::parse(&data, face_index) else {
                    continue;
                };
                let Some(name) = font_family_name(&face) else {
                    continue;
                };
                if name.to_lowercase() != wanted {
                    continue;
                }
                if !face.is_bold() && !face.is_italic() {
                    log::debug!(
                        "Font scan: {:.1}ms, {} files → {}",
                        t0.elapsed().as_secs_f64() * 1000.0,
                        files_scanned,
                        path.display(),
                    );
                    return Some((path, face_index));
                }
                if styled_fallback.is_none() {
                    styled_fallback = Some((path.clone(), face_index));
                }
            }
        }
    }

    log::debug!(
        "Font scan: {:.1}ms, {} files, regular weight not found",
        t0.elapsed().as_secs_f64() * 1000.0,
        files_scanned,
    );
    styled_fallback
}

/// Windows-1252 (WinAnsi) byte to Unicode char mapping.
/// Bytes 0x80-0x9F are remapped; all others map directly to their codepoint.
fn winansi_to_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}', // bullet
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        _ => byte as char,
    }
}

/// Map a single Unicode char to its WinAnsi byte, or 0 if unmappable.
fn char_to_winansi(c: char) -> u8 {
    match c as u32 {
        0x0020..=0x007F => c as u8,
        0x00A0..=0x00FF => c as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => 0,
    }
}

/// Convert a UTF-8 string to WinAnsi (Windows-1252) bytes for PDF Str
/// encoding. Unmappable chars drop out.
fn to_winansi_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .filter_map(|c| match char_to_winansi(c) {
            0 => None,
            byte => Some(byte),
        })
        .collect()
}

/// Encode UTF-8 text as big-endian 2-byte glyph IDs for CIDFont content
/// streams. Unknown chars become glyph 0 (.notdef).
fn encode_as_gids(text: &str, char_to_gid: &HashMap<char, u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for ch in text.chars() {
        let gid = char_to_gid.get(&ch).copied().unwrap_or(0);
        out.push((gid >> 8) as u8);
        out.push((gid & 0xFF) as u8);
    }
    out
}

/// Approximate Helvetica widths at 1000 units/em for WinAnsi chars 32..=255.
fn helvetica_widths() -> Vec<f32> {
    (32u8..=255u8)
        .map(|b| match b {
            32 => 278.0,                          // space
            33..=47 => 333.0,                     // punctuation
            48..=57 => 556.0,                     // digits
            58..=64 => 333.0,                     // more punctuation
            73 | 74 => 278.0,                     // I J (narrow uppercase)
            77 => 833.0,                          // M (wide)
            65..=90 => 667.0,                     // uppercase A-Z (average)
            91..=96 => 333.0,                     // brackets etc.
            102 | 105 | 106 | 108 | 116 => 278.0, // narrow lowercase: f i j l t
            109 | 119 => 833.0,                   // m w (wide)
            97..=122 => 556.0,                    // lowercase a-z (average)
            _ => 556.0,
        })
        .collect()
}

/// Embed a TrueType/OpenType font as a CIDFont (Type0 composite) with
/// Identity-H encoding, subset to the used glyphs. Returns the char-to-gid
/// map for content-stream encoding.
fn embed_truetype(
    pdf: &mut Pdf,
    font_ref: Ref,
    font_name: &str,
    font_data: &[u8],
    face_index: u32,
    char_widths_1000: &HashMap<char, f32>,
    alloc: &mut impl FnMut() -> Ref,
) -> Option<HashMap<char, u16>> {
    let face = Face::parse(font_data, face_index).ok()?;

    let units = face.units_per_em() as f32;
    let ascent = face.ascender() as f32 / units * 1000.0;
    let descent = face.descender() as f32 / units * 1000.0;
    let cap_height = face
        .capital_height()
        .map(|h| h as f32 / units * 1000.0)
        .unwrap_or(700.0);

    let bb = face.global_bounding_box();
    let bbox = Rect::new(
        bb.x_min as f32 / units * 1000.0,
        bb.y_min as f32 / units * 1000.0,
        bb.x_max as f32 / units * 1000.0,
        bb.y_max as f32 / units * 1000.0,
    );

    // Remap in sorted char order so the subset is deterministic.
    let mut used: Vec<char> = char_widths_1000.keys().copied().collect();
    used.sort_unstable();
    let mut remapper = subsetter::GlyphRemapper::new();
    let mut char_to_gid = HashMap::new();
    let mut gid_widths: Vec<(u16, f32)> = Vec::new();
    for ch in used {
        if let Some(gid) = face.glyph_index(ch) {
            let new_gid = remapper.remap(gid.0);
            char_to_gid.insert(ch, new_gid);
            let w = face
                .glyph_hor_advance(gid)
                .map(|adv| adv as f32 / units * 1000.0)
                .unwrap_or(0.0);
            gid_widths.push((new_gid, w));
        }
    }

    let subset_data = subsetter::subset(font_data, face_index, &remapper).unwrap_or_else(|e| {
        log::warn!("Font subsetting failed for {font_name}: {e} — embedding full font");
        font_data.to_vec()
    });

    let data_ref = alloc();
    let data_len = i32::try_from(subset_data.len()).ok()?;
    pdf.stream(data_ref, &subset_data)
        .pair(Name(b"Length1"), data_len);

    let ps_name = font_name.replace(' ', "");

    let descriptor_ref = alloc();
    pdf.font_descriptor(descriptor_ref)
        .name(Name(ps_name.as_bytes()))
        .flags(pdf_writer::types::FontFlags::NON_SYMBOLIC)
        .bbox(bbox)
        .italic_angle(0.0)
        .ascent(ascent)
        .descent(descent)
        .cap_height(cap_height)
        .stem_v(80.0)
        .font_file2(data_ref);

    let cid_font_ref = alloc();
    let system_info = pdf_writer::types::SystemInfo {
        registry: pdf_writer::Str(b"Adobe"),
        ordering: pdf_writer::Str(b"Identity"),
        supplement: 0,
    };
    {
        let mut cid = pdf.cid_font(cid_font_ref);
        cid.subtype(pdf_writer::types::CidFontType::Type2);
        cid.base_font(Name(ps_name.as_bytes()));
        cid.system_info(system_info);
        cid.font_descriptor(descriptor_ref);
        cid.default_width(0.0);
        cid.cid_to_gid_map_predefined(Name(b"Identity"));
        gid_widths.sort_by_key(|&(gid, _)| gid);
        if !gid_widths.is_empty() {
            let mut w = cid.widths();
            for &(gid, width) in &gid_widths {
                w.consecutive(gid, [width]);
            }
        }
    }

    let tounicode_ref = alloc();
    let cmap_name = format!("{}-UTF16", ps_name);
    let mut cmap = pdf_writer::types::UnicodeCmap::new(
        Name(cmap_name.as_bytes()),
        pdf_writer::types::SystemInfo {
            registry: pdf_writer::Str(b"Adobe"),
            ordering: pdf_writer::Str(b"Identity"),
            supplement: 0,
        },
    );
    for (&ch, &new_gid) in &char_to_gid {
        cmap.pair(new_gid, ch);
    }
    let cmap_data = cmap.finish();
    pdf.stream(tounicode_ref, cmap_data.as_slice());

    pdf.type0_font(font_ref)
        .base_font(Name(ps_name.as_bytes()))
        .encoding_predefined(Name(b"Identity-H"))
        .descendant_font(cid_font_ref)
        .to_unicode(tounicode_ref);

    Some(char_to_gid)
}
