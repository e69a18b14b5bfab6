//! Text layout inside an axis-aligned field box.
//!
//! Multi-line text is top anchored: the first baseline sits one ascent below
//! the top edge and later lines follow at `font_size * line_height_factor`.
//! Single-line text is bottom anchored: the baseline sits one descent above
//! the bottom edge, so short values rest on the printed line of the form.

use crate::font::FontRegistry;
use crate::types::Pt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// A font at a size, able to measure strings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FontFace<'a> {
    registry: &'a FontRegistry,
    pub(crate) name: &'a str,
    pub(crate) size: Pt,
}

impl<'a> FontFace<'a> {
    pub(crate) fn new(registry: &'a FontRegistry, name: &'a str, size: Pt) -> Self {
        Self {
            registry,
            name,
            size,
        }
    }

    pub(crate) fn measure(&self, text: &str) -> Pt {
        self.registry.measure_text_width(self.name, self.size, text)
    }

    pub(crate) fn fits(&self, text: &str, width: Pt) -> bool {
        self.measure(text) <= width
    }

    pub(crate) fn ascent(&self) -> Pt {
        self.registry.ascent(self.name, self.size)
    }

    pub(crate) fn descent(&self) -> Pt {
        self.registry.descent(self.name, self.size)
    }
}

/// Whether a field wraps. An explicit `true` always wraps; otherwise a box
/// taller than `threshold` wraps too. An explicit `false` does not suppress
/// the height rule.
pub fn is_multiline_field(multiline: Option<bool>, height: f32, threshold: f32) -> bool {
    multiline.unwrap_or(false) || height > threshold
}

#[derive(Debug, Clone)]
pub(crate) struct LayoutRequest<'a> {
    pub(crate) text: &'a str,
    pub(crate) width: Pt,
    pub(crate) height: Pt,
    pub(crate) align: Align,
    pub(crate) multiline: bool,
    pub(crate) line_height_factor: f32,
    pub(crate) ellipsis: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaidOutLine {
    pub text: String,
    /// Offset of the line's left edge from the box's left edge.
    pub x_offset: Pt,
    /// Distance from the box's top edge down to the line's baseline.
    pub baseline_from_top: Pt,
    pub width: Pt,
}

pub(crate) fn layout_text(face: &FontFace<'_>, request: &LayoutRequest<'_>) -> Vec<LaidOutLine> {
    let lines = if request.multiline {
        multiline_lines(face, request)
    } else {
        let collapsed = collapse_newlines(request.text);
        vec![truncate_with_ellipsis(
            face,
            &collapsed,
            request.width,
            request.ellipsis,
        )]
    };

    let line_height = face.size * request.line_height_factor;
    let single_baseline = request.height - face.descent();
    let ascent = face.ascent();

    lines
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let width = face.measure(&text);
            let baseline_from_top = if request.multiline {
                ascent + line_height * (index as i32)
            } else {
                single_baseline
            };
            LaidOutLine {
                x_offset: align_offset(request.align, request.width, width),
                baseline_from_top,
                width,
                text,
            }
        })
        .collect()
}

fn multiline_lines(face: &FontFace<'_>, request: &LayoutRequest<'_>) -> Vec<String> {
    let mut lines = wrap_text(face, request.text, request.width);
    let max_lines = max_line_count(request.height, face.size, request.line_height_factor);
    if lines.len() <= max_lines {
        return lines;
    }
    lines.truncate(max_lines);
    if let Some(last) = lines.last_mut() {
        *last = append_ellipsis(face, last, request.width, request.ellipsis);
    }
    lines
}

/// `floor(height / (font_size * factor))`, never less than one line.
pub(crate) fn max_line_count(height: Pt, font_size: Pt, factor: f32) -> usize {
    let line_height = (font_size * factor).to_milli_i64();
    if line_height <= 0 {
        return 1;
    }
    let count = height.to_milli_i64().max(0) / line_height;
    (count as usize).max(1)
}

pub(crate) fn align_offset(align: Align, box_width: Pt, text_width: Pt) -> Pt {
    match align {
        Align::Left => Pt::ZERO,
        Align::Center => (box_width - text_width) / 2,
        Align::Right => box_width - text_width,
    }
}

pub(crate) fn collapse_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Greedy word wrap. Paragraphs (split on newlines) wrap independently and
/// an empty paragraph yields one empty line.
pub(crate) fn wrap_text(face: &FontFace<'_>, text: &str, width: Pt) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();
    for paragraph in normalized.split('\n') {
        wrap_paragraph(face, paragraph, width, &mut out);
    }
    out
}

fn wrap_paragraph(face: &FontFace<'_>, paragraph: &str, width: Pt, out: &mut Vec<String>) {
    if paragraph.trim().is_empty() {
        out.push(String::new());
        return;
    }
    let mut line = String::new();
    for word in paragraph.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if face.fits(&candidate, width) {
            line = candidate;
            continue;
        }
        if !line.is_empty() {
            out.push(std::mem::take(&mut line));
        }
        if face.fits(word, width) {
            line = word.to_string();
            continue;
        }
        let mut pieces = hard_break(face, word, width);
        // The tail of a broken word stays open so the next word can join it.
        line = pieces.pop().unwrap_or_default();
        out.extend(pieces);
    }
    if !line.is_empty() {
        out.push(line);
    }
}

/// Splits a word wider than `width` into maximal fitting prefixes. A piece
/// always holds at least one character, so a zero-width box still terminates.
fn hard_break(face: &FontFace<'_>, word: &str, width: Pt) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = start + 1;
        while end < chars.len() {
            let candidate: String = chars[start..=end].iter().collect();
            if !face.fits(&candidate, width) {
                break;
            }
            end += 1;
        }
        pieces.push(chars[start..end].iter().collect());
        start = end;
    }
    pieces
}

/// Returns `text` when it fits, otherwise the longest prefix for which
/// `prefix + ellipsis` fits. When not even the ellipsis fits, the bare
/// ellipsis is returned and allowed to overflow.
pub(crate) fn truncate_with_ellipsis(
    face: &FontFace<'_>,
    text: &str,
    width: Pt,
    ellipsis: &str,
) -> String {
    if face.fits(text, width) {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    shrink_until_fits(face, &chars[..chars.len().saturating_sub(1)], width, ellipsis)
}

fn append_ellipsis(face: &FontFace<'_>, line: &str, width: Pt, ellipsis: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    shrink_until_fits(face, &chars, width, ellipsis)
}

fn shrink_until_fits(face: &FontFace<'_>, chars: &[char], width: Pt, ellipsis: &str) -> String {
    for keep in (0..=chars.len()).rev() {
        let mut candidate: String = chars[..keep].iter().collect();
        candidate.push_str(ellipsis);
        if face.fits(&candidate, width) {
            return candidate;
        }
    }
    ellipsis.to_string()
}
