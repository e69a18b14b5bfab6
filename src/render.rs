//! Field renderer: one value lookup, transform and draw per placement.
//!
//! Fields are processed strictly in the order given, since later fields may
//! be meant to paint over earlier ones. A failure inside one field never stops
//! the loop; it is recorded in the [`RenderReport`] and logged.

use crate::canvas::Canvas;
use crate::config::StampConfig;
use crate::field::{
    CharBoxSpec, ConditionalSpec, FieldKind, FieldMetadata, ListColumn, ListSpec, OptionsSpec,
};
use crate::font::FontRegistry;
use crate::image::{PdfImage, decode_image_source, fit_image};
use crate::layout::{
    Align, FontFace, LayoutRequest, align_offset, collapse_newlines, is_multiline_field,
    layout_text, wrap_text,
};
use crate::types::Pt;
use crate::unify::{CoordinateUnifier, NativeBox};
use crate::value::{FieldValue, Row, ValueMap};
use serde::Serialize;
use std::fmt;

/// Char-boxed list columns sit this far above the row baseline.
const LIST_CHAR_BOX_LIFT: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum SkipReason {
    /// No value, or a value that is empty after trimming.
    Blank,
    /// A present value that produced no glyphs, such as a char box holding
    /// only hyphens or list rows whose mapped columns are all empty.
    NothingToDraw,
    /// A list bound to a scalar placement.
    NotScalar,
    UnparseableDate,
    Image(String),
    /// Neither the field's font nor the configured default is registered.
    UnknownFont,
    /// A scalar bound to a list placement.
    NoRows,
    ConditionNotMet,
    NoOption,
    MissingPage,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Blank => write!(f, "no value"),
            SkipReason::NothingToDraw => write!(f, "value leaves nothing to draw"),
            SkipReason::NotScalar => write!(f, "value is a list"),
            SkipReason::UnparseableDate => write!(f, "value is not a YYYY-MM-DD date"),
            SkipReason::Image(detail) => write!(f, "image rejected: {detail}"),
            SkipReason::UnknownFont => write!(f, "no usable font"),
            SkipReason::NoRows => write!(f, "value is not a list"),
            SkipReason::ConditionNotMet => write!(f, "value does not match the trigger"),
            SkipReason::NoOption => write!(f, "value selects no option"),
            SkipReason::MissingPage => write!(f, "page does not exist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawnField {
    pub key: String,
    pub field_number: String,
    pub page_index: usize,
    pub draw_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedField {
    pub key: String,
    pub field_number: String,
    pub page_index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub drawn: Vec<DrawnField>,
    pub skipped: Vec<SkippedField>,
}

impl RenderReport {
    pub fn draw_calls(&self) -> usize {
        self.drawn.iter().map(|field| field.draw_calls).sum()
    }

    pub fn skipped_for(&self, reason: &SkipReason) -> impl Iterator<Item = &SkippedField> {
        self.skipped.iter().filter(move |field| &field.reason == reason)
    }

    pub fn first_missing_page(&self) -> Option<&SkippedField> {
        self.skipped_for(&SkipReason::MissingPage).next()
    }
}

/// A single draw in native page space.
#[derive(Debug)]
enum Mark {
    Text {
        x: Pt,
        y: Pt,
        text: String,
    },
    Image {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        image: PdfImage,
    },
}

impl Mark {
    fn text(x: Pt, y: Pt, text: impl Into<String>) -> Self {
        Mark::Text {
            x,
            y,
            text: text.into(),
        }
    }
}

type FieldResult<T> = std::result::Result<T, SkipReason>;

pub(crate) struct FieldRenderer<'a> {
    config: &'a StampConfig,
    fonts: &'a FontRegistry,
    /// One unifier per template page, indexed by page.
    pages: &'a [CoordinateUnifier],
}

impl<'a> FieldRenderer<'a> {
    pub(crate) fn new(
        config: &'a StampConfig,
        fonts: &'a FontRegistry,
        pages: &'a [CoordinateUnifier],
    ) -> Self {
        Self {
            config,
            fonts,
            pages,
        }
    }

    pub(crate) fn render(
        &self,
        canvas: &mut Canvas,
        fields: &[FieldMetadata],
        values: &ValueMap,
    ) -> RenderReport {
        let mut report = RenderReport::default();
        for field in fields {
            match self.render_field(canvas, field, values) {
                Ok(draw_calls) => report.drawn.push(DrawnField {
                    key: field.key.clone(),
                    field_number: field.field_number.clone(),
                    page_index: field.page_index,
                    draw_calls,
                }),
                Err(reason) => {
                    match &reason {
                        SkipReason::Image(detail) => log::error!(
                            "field {} ({}): image skipped: {detail}",
                            field.key,
                            field.field_number
                        ),
                        SkipReason::MissingPage => log::warn!(
                            "field {} targets missing page {}",
                            field.key,
                            field.page_index
                        ),
                        other => log::debug!(
                            "field {} ({}) skipped: {other}",
                            field.key,
                            field.field_number
                        ),
                    }
                    report.skipped.push(SkippedField {
                        key: field.key.clone(),
                        field_number: field.field_number.clone(),
                        page_index: field.page_index,
                        reason,
                    });
                }
            }
        }
        report
    }

    fn render_field(
        &self,
        canvas: &mut Canvas,
        field: &FieldMetadata,
        values: &ValueMap,
    ) -> FieldResult<usize> {
        let unifier = self
            .pages
            .get(field.page_index)
            .ok_or(SkipReason::MissingPage)?;
        if !canvas.select_page(field.page_index) {
            return Err(SkipReason::MissingPage);
        }
        let value = values
            .drawable(&field.field_number)
            .ok_or(SkipReason::Blank)?;

        if matches!(field.kind, FieldKind::Image) {
            let marks = self.image_marks(unifier, field, value)?;
            return self.emit(canvas, None, marks);
        }

        let face = self.face_for(field)?;
        let marks = match &field.kind {
            FieldKind::Plain => {
                let text = self.display_text(field, value)?;
                self.boxed_marks(&face, unifier, field, &text)
            }
            FieldKind::CharBox(spec) => {
                let text = self.display_text(field, value)?;
                let native = unifier.unify_box(field.x, field.y, field.width, field.height);
                self.char_box_marks(&face, unifier, field.x, &native, spec, &text)
            }
            FieldKind::List(spec) => self.list_marks(&face, unifier, field, spec, value)?,
            FieldKind::Conditional(spec) => {
                self.conditional_marks(&face, unifier, field, spec, value)?
            }
            FieldKind::Options(spec) => self.option_marks(unifier, spec, value)?,
            FieldKind::Image => Vec::new(),
        };
        self.emit(canvas, Some(&face), marks)
    }

    fn emit(
        &self,
        canvas: &mut Canvas,
        face: Option<&FontFace<'_>>,
        marks: Vec<Mark>,
    ) -> FieldResult<usize> {
        if marks.is_empty() {
            return Err(SkipReason::NothingToDraw);
        }
        let count = marks.len();
        canvas.save_state();
        canvas.set_fill_color(self.config.text_color);
        if let Some(face) = face {
            canvas.set_font_name(face.name);
            canvas.set_font_size(face.size);
        }
        for mark in marks {
            match mark {
                Mark::Text { x, y, text } => canvas.draw_string(x, y, text),
                Mark::Image {
                    x,
                    y,
                    width,
                    height,
                    image,
                } => {
                    let resource_id = canvas.register_image(image);
                    canvas.draw_image(x, y, width, height, resource_id);
                }
            }
        }
        canvas.restore_state();
        Ok(count)
    }

    fn face_for(&self, field: &FieldMetadata) -> FieldResult<FontFace<'a>> {
        let requested = field
            .font
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.config.default_font);
        let name = match self.fonts.canonical_name(requested) {
            Some(name) => name,
            None => {
                log::warn!(
                    "field {}: font {requested:?} is not registered, using {}",
                    field.key,
                    self.config.default_font
                );
                self.fonts
                    .canonical_name(&self.config.default_font)
                    .ok_or(SkipReason::UnknownFont)?
            }
        };
        let name = if field.bold {
            self.fonts.bold_variant(name).unwrap_or(name)
        } else {
            name
        };
        let size = field
            .font_size
            .filter(|size| size.is_finite() && *size > 0.0)
            .unwrap_or(self.config.default_font_size);
        Ok(FontFace::new(self.fonts, name, Pt::from_f32(size)))
    }

    /// Day-clinic substitution and date formatting.
    fn display_text(&self, field: &FieldMetadata, value: &FieldValue) -> FieldResult<String> {
        let day_count =
            field.format.day_count || self.config.is_day_clinic_field(&field.field_number);
        if day_count && value.as_number() == Some(0.0) {
            return Ok(self.config.day_clinic_text.clone());
        }
        let text = value.as_text().ok_or(SkipReason::NotScalar)?;
        if field.format.date {
            return self.format_date(&text);
        }
        Ok(text)
    }

    fn format_date(&self, raw: &str) -> FieldResult<String> {
        use std::fmt::Write;

        let raw = raw.trim();
        // Timestamps ("2024-03-05T10:00:00Z") carry the date in their first ten bytes.
        let date_part = raw.get(..10).filter(|_| raw.len() > 10 && raw.as_bytes()[10] == b'T');
        let date = chrono::NaiveDate::parse_from_str(date_part.unwrap_or(raw), "%Y-%m-%d")
            .map_err(|_| SkipReason::UnparseableDate)?;
        let mut out = String::new();
        write!(out, "{}", date.format(&self.config.date_format))
            .map_err(|_| SkipReason::UnparseableDate)?;
        Ok(out)
    }

    fn boxed_marks(
        &self,
        face: &FontFace<'_>,
        unifier: &CoordinateUnifier,
        field: &FieldMetadata,
        text: &str,
    ) -> Vec<Mark> {
        let native = unifier.unify_box(field.x, field.y, field.width, field.height);
        if native.width <= Pt::ZERO {
            return vec![self.anchored_mark(face, &native, field.align, text)];
        }
        let multiline = is_multiline_field(
            field.multiline,
            field.height,
            self.config.multiline_height_threshold,
        );
        let request = LayoutRequest {
            text,
            width: native.width,
            height: native.height,
            align: field.align,
            multiline,
            line_height_factor: self.config.line_height_factor,
            ellipsis: &self.config.ellipsis,
        };
        layout_text(face, &request)
            .into_iter()
            .filter(|line| !line.text.is_empty())
            .map(|line| {
                Mark::text(
                    native.left + line.x_offset,
                    native.top - line.baseline_from_top,
                    line.text,
                )
            })
            .collect()
    }

    /// Text with no box width: drawn unclipped, aligned around the left edge.
    fn anchored_mark(
        &self,
        face: &FontFace<'_>,
        native: &NativeBox,
        align: Align,
        text: &str,
    ) -> Mark {
        let text = collapse_newlines(text);
        let width = face.measure(&text);
        let x = match align {
            Align::Left => native.left,
            Align::Center => native.left - width / 2,
            Align::Right => native.left - width,
        };
        Mark::text(x, single_line_baseline(face, native), text)
    }

    /// One glyph per box, hyphens removed, centered at
    /// `x + i * char_width + box_width / 2` and capped at the box limit.
    fn char_box_marks(
        &self,
        face: &FontFace<'_>,
        unifier: &CoordinateUnifier,
        x: f32,
        native: &NativeBox,
        spec: &CharBoxSpec,
        text: &str,
    ) -> Vec<Mark> {
        let defaults = self.config.char_box;
        let char_width = spec.char_width.unwrap_or(defaults.char_width);
        let box_width = spec.box_width.unwrap_or(defaults.box_width);
        let limit = spec.limit.unwrap_or(defaults.limit);
        let baseline = single_line_baseline(face, native);

        text.chars()
            .filter(|ch| *ch != '-')
            .take(limit)
            .enumerate()
            .filter(|(_, ch)| !ch.is_whitespace())
            .map(|(index, ch)| {
                let center = unifier.native_x(x + index as f32 * char_width + box_width / 2.0);
                let glyph = ch.to_string();
                let width = face.measure(&glyph);
                Mark::text(center - width / 2, baseline, glyph)
            })
            .collect()
    }

    fn image_marks(
        &self,
        unifier: &CoordinateUnifier,
        field: &FieldMetadata,
        value: &FieldValue,
    ) -> FieldResult<Vec<Mark>> {
        let source = value.as_text().ok_or(SkipReason::NotScalar)?;
        let image = decode_image_source(&source).map_err(|err| SkipReason::Image(err.to_string()))?;
        let box_width = positive_or(field.width, self.config.image_box_width);
        let box_height = positive_or(field.height, self.config.image_box_height);
        let fit = fit_image(image.aspect_ratio(), box_width, box_height);
        let placed = unifier.unify_box(
            field.x + fit.offset_x,
            field.y + fit.offset_y,
            fit.width,
            fit.height,
        );
        Ok(vec![Mark::Image {
            x: placed.left,
            y: placed.bottom,
            width: placed.width,
            height: placed.height,
            image,
        }])
    }

    fn list_marks(
        &self,
        face: &FontFace<'_>,
        unifier: &CoordinateUnifier,
        field: &FieldMetadata,
        spec: &ListSpec,
        value: &FieldValue,
    ) -> FieldResult<Vec<Mark>> {
        let rows = value.rows().ok_or(SkipReason::NoRows)?;
        let start_y = spec.start_y.unwrap_or(field.y);
        let row_height = spec
            .row_height
            .filter(|height| height.is_finite() && *height > 0.0)
            .unwrap_or(self.config.list_row_height);
        let max_rows = spec.max_rows.unwrap_or(rows.len());
        let blank_zero_quantity = self
            .config
            .blank_zero_quantity_lists
            .iter()
            .any(|list| list == &field.field_number);

        if rows.len() > max_rows {
            log::debug!(
                "list {} holds {} rows; drawing the first {max_rows}",
                field.key,
                rows.len()
            );
        }

        let mut marks = Vec::new();
        for (index, row) in rows.iter().take(max_rows).enumerate() {
            let row_y = start_y + index as f32 * row_height;
            for column in &spec.columns {
                let Some(text) = column_text(row, column, blank_zero_quantity) else {
                    continue;
                };
                marks.extend(self.column_marks(face, unifier, column, row_y, &text));
            }
        }
        Ok(marks)
    }

    /// `row_y` is the row's baseline. Cells are zero-height boxes so every
    /// column shares that baseline.
    fn column_marks(
        &self,
        face: &FontFace<'_>,
        unifier: &CoordinateUnifier,
        column: &ListColumn,
        row_y: f32,
        text: &str,
    ) -> Vec<Mark> {
        if let Some(spec) = &column.char_box {
            let native = unifier.unify_box(column.x, row_y - LIST_CHAR_BOX_LIFT, 0.0, 0.0);
            return self.char_box_marks(face, unifier, column.x, &native, spec, text);
        }
        let native = unifier.unify_box(column.x, row_y, column.width.unwrap_or(0.0), 0.0);
        if column.width.is_none() {
            return vec![self.anchored_mark(face, &native, column.align, text)];
        }

        // Wrapped columns keep every line, continuing below the row.
        let line_height = face.size * self.config.line_height_factor;
        let first_baseline = native.top;
        wrap_text(face, text, native.width)
            .into_iter()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(index, line)| {
                let offset = align_offset(column.align, native.width, face.measure(&line));
                Mark::text(
                    native.left + offset,
                    first_baseline - line_height * (index as i32),
                    line,
                )
            })
            .collect()
    }

    fn conditional_marks(
        &self,
        face: &FontFace<'_>,
        unifier: &CoordinateUnifier,
        field: &FieldMetadata,
        spec: &ConditionalSpec,
        value: &FieldValue,
    ) -> FieldResult<Vec<Mark>> {
        let actual = value.as_text().ok_or(SkipReason::NotScalar)?;
        if actual.trim() != spec.trigger.trim() {
            return Err(SkipReason::ConditionNotMet);
        }
        let mark = spec.text.as_deref().unwrap_or(&self.config.conditional_mark);
        let native = unifier.unify_box(field.x, field.y, field.width, field.height);
        let width = face.measure(mark);
        let x = native.left + align_offset(field.align, native.width.max(Pt::ZERO), width);
        Ok(vec![Mark::text(x, single_line_baseline(face, &native), mark)])
    }

    fn option_marks(
        &self,
        unifier: &CoordinateUnifier,
        spec: &OptionsSpec,
        value: &FieldValue,
    ) -> FieldResult<Vec<Mark>> {
        let selected = value.as_text().ok_or(SkipReason::NotScalar)?;
        let point = spec
            .marks
            .get(selected.trim())
            .ok_or(SkipReason::NoOption)?;
        let mark = spec.text.as_deref().unwrap_or(&self.config.option_mark);
        // The option point is where the mark's baseline starts.
        Ok(vec![Mark::text(
            unifier.native_x(point.x),
            unifier.native_y(point.y),
            mark,
        )])
    }
}

/// Baseline one descent above the bottom edge; a zero-height box puts the
/// baseline on its top edge.
fn single_line_baseline(face: &FontFace<'_>, native: &NativeBox) -> Pt {
    if native.height > Pt::ZERO {
        native.bottom + face.descent()
    } else {
        native.top
    }
}

fn column_text(row: &Row, column: &ListColumn, blank_zero_quantity: bool) -> Option<String> {
    let value = row.get(&column.key).filter(|value| !value.is_blank())?;
    if blank_zero_quantity && column.key == "quantidade" && value.as_number() == Some(0.0) {
        return None;
    }
    value.as_text()
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}
