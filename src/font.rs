use crate::error::{FormStampError, Result};
use crate::types::Pt;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub const DEFAULT_FONT: &str = "Helvetica";

const FIRST_CHAR: u8 = 32;
const LAST_CHAR: u8 = 255;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }
}

/// Font faces available to the renderer. Every face is drawn as a simple
/// WinAnsi-encoded font so measurement and output agree byte for byte.
#[derive(Debug)]
pub(crate) struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
pub(crate) enum FontProgram {
    /// One of the standard 14 faces every viewer ships; nothing is embedded.
    Standard,
    TrueType(Vec<u8>),
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) program: FontProgram,
    pub(crate) metrics: FontMetrics,
}

#[derive(Debug)]
pub(crate) struct FontMetrics {
    pub(crate) first_char: u8,
    pub(crate) last_char: u8,
    pub(crate) widths: Vec<u16>,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) stem_v: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
}

impl FontRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        };
        registry.push_font(
            RegisteredFont {
                name: "Helvetica".to_string(),
                program: FontProgram::Standard,
                metrics: FontMetrics::standard(&HELVETICA_WIDTHS, 718, -207, false),
            },
            &["helvetica", "arial", "sans-serif"],
        );
        registry.push_font(
            RegisteredFont {
                name: "Helvetica-Bold".to_string(),
                program: FontProgram::Standard,
                metrics: FontMetrics::standard(&HELVETICA_BOLD_WIDTHS, 718, -207, false),
            },
            &["helvetica bold", "arial bold"],
        );
        registry.push_font(
            RegisteredFont {
                name: "Courier".to_string(),
                program: FontProgram::Standard,
                metrics: FontMetrics::monospaced(600, 629, -157),
            },
            &["courier", "monospace"],
        );
        registry.push_font(
            RegisteredFont {
                name: "Courier-Bold".to_string(),
                program: FontProgram::Standard,
                metrics: FontMetrics::monospaced(600, 629, -157),
            },
            &["courier bold"],
        );
        registry
    }

    fn push_font(&mut self, font: RegisteredFont, aliases: &[&str]) -> usize {
        let index = self.fonts.len();
        let mut keys = vec![normalize_name(&font.name)];
        keys.extend(aliases.iter().map(|alias| normalize_name(alias)));
        for key in keys {
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        self.fonts.push(font);
        index
    }

    pub(crate) fn register_dir(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let mut added = 0usize;
        for entry in fs::read_dir(path.as_ref())?.flatten() {
            let path = entry.path();
            let is_font = path
                .extension()
                .and_then(|v| v.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"))
                .unwrap_or(false);
            if !is_font {
                continue;
            }
            match self.register_file(&path) {
                Ok(_) => added += 1,
                Err(err) => log::warn!("skipping font {}: {err}", path.display()),
            }
        }
        Ok(added)
    }

    pub(crate) fn register_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let source = path
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or("EmbeddedFont")
            .to_string();
        self.register_bytes(data, Some(&source))
    }

    pub(crate) fn register_bytes(&mut self, data: Vec<u8>, source_name: Option<&str>) -> Result<String> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|err| FormStampError::Font(format!("invalid font data for {source}: {err}")))?;
        if face.tables().cff.is_some() {
            return Err(FormStampError::Font(format!(
                "{source}: CFF-flavoured OpenType fonts are not supported"
            )));
        }
        let (name, aliases) = font_names(&face, source);
        let metrics = FontMetrics::from_face(&face);
        drop(face);
        let alias_refs: Vec<&str> = aliases.iter().map(String::as_str).collect();
        self.push_font(
            RegisteredFont {
                name: name.clone(),
                program: FontProgram::TrueType(data),
                metrics,
            },
            &alias_refs,
        );
        Ok(name)
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        self.lookup
            .get(&normalize_name(name))
            .and_then(|index| self.fonts.get(*index))
    }

    /// The registered name of `name`, or `None` when the face is unknown.
    pub(crate) fn canonical_name(&self, name: &str) -> Option<&str> {
        self.resolve(name).map(|font| font.name.as_str())
    }

    /// The bold face of the family `name` belongs to, when one is registered.
    pub(crate) fn bold_variant(&self, name: &str) -> Option<&str> {
        let base = self.canonical_name(name)?;
        if normalize_name(base).ends_with("bold") {
            return Some(base);
        }
        [format!("{base}-Bold"), format!("{base} Bold"), format!("{base}Bold")]
            .iter()
            .find_map(|candidate| self.canonical_name(candidate))
    }

    pub(crate) fn measure_text_width(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        let Some(index) = self.lookup.get(&normalize_name(name)).copied() else {
            let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
            return char_width * (text.chars().count() as i32);
        };
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let value = self.fonts[index].metrics.measure_text_width(font_size, text);
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    /// Distance from the baseline to the top of the tallest glyph.
    pub(crate) fn ascent(&self, name: &str, font_size: Pt) -> Pt {
        let ascent = self.resolve(name).map(|f| f.metrics.ascent).unwrap_or(718);
        font_size.mul_ratio(ascent as i32, 1000)
    }

    /// Distance from the baseline down to the lowest descender, as a positive length.
    pub(crate) fn descent(&self, name: &str, font_size: Pt) -> Pt {
        let descent = self.resolve(name).map(|f| f.metrics.descent).unwrap_or(-207);
        font_size.mul_ratio((descent as i32).abs(), 1000)
    }
}

impl FontMetrics {
    fn standard(widths: &[u16; 224], ascent: i16, descent: i16, fixed: bool) -> Self {
        Self {
            first_char: FIRST_CHAR,
            last_char: LAST_CHAR,
            widths: widths.to_vec(),
            ascent,
            descent,
            cap_height: ascent,
            italic_angle: 0,
            stem_v: 88,
            bbox: (-166, -225, 1000, 931),
            missing_width: widths[0],
            is_fixed_pitch: fixed,
        }
    }

    fn monospaced(advance: u16, ascent: i16, descent: i16) -> Self {
        Self::standard(&[advance; 224], ascent, descent, true)
    }

    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let mut widths = Vec::with_capacity((LAST_CHAR - FIRST_CHAR) as usize + 1);
        for code in FIRST_CHAR..=LAST_CHAR {
            let advance = winansi_char(code)
                .and_then(|ch| face.glyph_index(ch))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| (adv as f32 * scale).round() as u16)
                .unwrap_or(0);
            widths.push(advance);
        }
        let missing_width = widths.first().copied().unwrap_or(0);
        let ascent = scale_i16(face.ascender(), scale);
        let bbox = face.global_bounding_box();
        Self {
            first_char: FIRST_CHAR,
            last_char: LAST_CHAR,
            widths,
            ascent,
            descent: scale_i16(face.descender(), scale),
            cap_height: face
                .capital_height()
                .map(|value| scale_i16(value, scale))
                .unwrap_or(ascent),
            italic_angle: face.italic_angle().map(|v| v.round() as i16).unwrap_or(0),
            stem_v: 80,
            bbox: (
                scale_i16(bbox.x_min, scale),
                scale_i16(bbox.y_min, scale),
                scale_i16(bbox.x_max, scale),
                scale_i16(bbox.y_max, scale),
            ),
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
        }
    }

    fn advance_for_byte(&self, code: u8) -> u16 {
        if code < self.first_char || code > self.last_char {
            return self.missing_width;
        }
        self.widths
            .get((code - self.first_char) as usize)
            .copied()
            .unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let total_units: i32 = encode_winansi(text)
            .bytes
            .iter()
            .map(|code| self.advance_for_byte(*code) as i32)
            .fold(0i32, |acc, adv| acc.saturating_add(adv));
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    (value as f32 * scale).round() as i16
}

fn font_names(face: &ttf_parser::Face<'_>, source: &str) -> (String, Vec<String>) {
    let mut postscript = None;
    let mut full = None;
    let mut family = None;
    for name in face.names() {
        let Some(value) = name.to_string() else {
            continue;
        };
        match name.name_id {
            ttf_parser::name_id::POST_SCRIPT_NAME if postscript.is_none() => postscript = Some(value),
            ttf_parser::name_id::FULL_NAME if full.is_none() => full = Some(value),
            ttf_parser::name_id::FAMILY if family.is_none() => family = Some(value),
            _ => {}
        }
    }
    let primary = postscript
        .clone()
        .or_else(|| full.clone())
        .unwrap_or_else(|| source.to_string());
    let aliases = [full, family, Some(source.to_string())]
        .into_iter()
        .flatten()
        .filter(|alias| alias != &primary)
        .collect();
    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// WinAnsi (cp1252) code points 0x80..=0x9F that differ from Latin-1.
const CP1252_HIGH: [(u8, char); 27] = [
    (0x80, '\u{20AC}'),
    (0x82, '\u{201A}'),
    (0x83, '\u{0192}'),
    (0x84, '\u{201E}'),
    (0x85, '\u{2026}'),
    (0x86, '\u{2020}'),
    (0x87, '\u{2021}'),
    (0x88, '\u{02C6}'),
    (0x89, '\u{2030}'),
    (0x8A, '\u{0160}'),
    (0x8B, '\u{2039}'),
    (0x8C, '\u{0152}'),
    (0x8E, '\u{017D}'),
    (0x91, '\u{2018}'),
    (0x92, '\u{2019}'),
    (0x93, '\u{201C}'),
    (0x94, '\u{201D}'),
    (0x95, '\u{2022}'),
    (0x96, '\u{2013}'),
    (0x97, '\u{2014}'),
    (0x98, '\u{02DC}'),
    (0x99, '\u{2122}'),
    (0x9A, '\u{0161}'),
    (0x9B, '\u{203A}'),
    (0x9C, '\u{0153}'),
    (0x9E, '\u{017E}'),
    (0x9F, '\u{0178}'),
];

fn winansi_byte(ch: char) -> Option<u8> {
    match ch {
        '\u{0020}'..='\u{007E}' | '\u{00A0}'..='\u{00FF}' => Some(ch as u32 as u8),
        _ => CP1252_HIGH
            .iter()
            .find(|(_, mapped)| *mapped == ch)
            .map(|(code, _)| *code),
    }
}

fn winansi_char(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as char),
        _ => CP1252_HIGH
            .iter()
            .find(|(mapped, _)| *mapped == code)
            .map(|(_, ch)| *ch),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WinAnsiEncoded {
    pub(crate) bytes: Vec<u8>,
    pub(crate) replaced: usize,
}

/// Encodes `text` for a WinAnsi simple font. Characters outside the code page
/// become `?`; tabs and other controls become spaces.
pub(crate) fn encode_winansi(text: &str) -> WinAnsiEncoded {
    let mut bytes = Vec::with_capacity(text.len());
    let mut replaced = 0usize;
    for ch in text.chars() {
        if ch.is_control() {
            bytes.push(b' ');
            continue;
        }
        match winansi_byte(ch) {
            Some(code) => bytes.push(code),
            None => {
                replaced += 1;
                bytes.push(b'?');
            }
        }
    }
    WinAnsiEncoded { bytes, replaced }
}

#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 224] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, 0,
    556, 0, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 0, 500, 667,
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

#[rustfmt::skip]
const HELVETICA_BOLD_WIDTHS: [u16; 224] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, 0,
    556, 0, 278, 556, 500, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 278, 278, 500, 500, 350, 556, 1000, 333, 1000, 556, 333, 944, 0, 500, 667,
    278, 333, 556, 556, 556, 556, 280, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 611, 556, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    722, 722, 722, 722, 722, 722, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 556, 556, 556, 556, 556, 278, 278, 278, 278,
    611, 611, 611, 611, 611, 611, 611, 584, 611, 611, 611, 611, 611, 556, 611, 556,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_measures_with_afm_widths() {
        let registry = FontRegistry::new();
        let width = registry.measure_text_width("Helvetica", Pt::from_f32(9.0), "Maria Souza");
        assert_eq!(width.to_milli_i64(), 50_517);
        let cached = registry.measure_text_width("helvetica", Pt::from_f32(9.0), "Maria Souza");
        assert_eq!(width, cached);
    }

    #[test]
    fn accented_letters_measure_like_their_base_letters() {
        let registry = FontRegistry::new();
        let size = Pt::from_f32(10.0);
        assert_eq!(
            registry.measure_text_width("Helvetica", size, "Conceição"),
            registry.measure_text_width("Helvetica", size, "Conceicao")
        );
    }

    #[test]
    fn courier_is_fixed_pitch() {
        let registry = FontRegistry::new();
        let w = registry.measure_text_width("Courier", Pt::from_f32(10.0), "iiiii");
        assert_eq!(w.to_milli_i64(), 30_000);
    }

    #[test]
    fn bold_variant_resolves_within_family() {
        let registry = FontRegistry::new();
        assert_eq!(registry.bold_variant("helvetica"), Some("Helvetica-Bold"));
        assert_eq!(registry.bold_variant("Courier"), Some("Courier-Bold"));
        assert_eq!(registry.bold_variant("Helvetica-Bold"), Some("Helvetica-Bold"));
        assert_eq!(registry.bold_variant("Nope"), None);
    }

    #[test]
    fn ascent_and_descent_follow_font_size() {
        let registry = FontRegistry::new();
        let size = Pt::from_f32(10.0);
        assert_eq!(registry.ascent("Helvetica", size).to_milli_i64(), 7_180);
        assert_eq!(registry.descent("Helvetica", size).to_milli_i64(), 2_070);
    }

    #[test]
    fn winansi_encoding_maps_cp1252_and_replaces_the_rest() {
        let encoded = encode_winansi("ç€\u{4E2D}");
        assert_eq!(encoded.bytes, vec![0xE7, 0x80, b'?']);
        assert_eq!(encoded.replaced, 1);
        assert_eq!(winansi_char(0x96), Some('\u{2013}'));
    }

    #[test]
    fn register_bytes_rejects_garbage() {
        let mut registry = FontRegistry::new();
        assert!(registry.register_bytes(vec![0, 1, 2, 3], Some("bad")).is_err());
    }
}
