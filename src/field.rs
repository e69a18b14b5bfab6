use crate::error::{FormStampError, Result};
use crate::layout::Align;
use crate::value::FieldValue;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Placement of one value on a template page. Coordinates are in the
/// rendered (cropped, y-down) space of the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawFieldMetadata")]
pub struct FieldMetadata {
    /// Identifies the placement; never used for value lookup.
    pub key: String,
    pub page_index: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: Option<String>,
    /// Key into the value map.
    pub field_number: String,
    pub multiline: Option<bool>,
    pub font: Option<String>,
    pub font_size: Option<f32>,
    pub align: Align,
    pub bold: bool,
    pub format: ValueFormat,
    pub kind: FieldKind,
}

/// Value transforms applied before layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueFormat {
    /// ISO `YYYY-MM-DD` input reformatted for display.
    pub date: bool,
    /// A count of authorized days; zero is shown as the day-clinic text.
    pub day_count: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Plain,
    CharBox(CharBoxSpec),
    List(ListSpec),
    Conditional(ConditionalSpec),
    Options(OptionsSpec),
    Image,
}

/// Fixed-pitch boxes, one character per box. Unset values take the
/// configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CharBoxSpec {
    pub char_width: Option<f32>,
    pub box_width: Option<f32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListSpec {
    pub start_y: Option<f32>,
    pub row_height: Option<f32>,
    pub max_rows: Option<usize>,
    pub columns: Vec<ListColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListColumn {
    pub key: String,
    pub x: f32,
    pub width: Option<f32>,
    pub align: Align,
    pub char_box: Option<CharBoxSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalSpec {
    pub trigger: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionsSpec {
    pub marks: BTreeMap<String, MarkPoint>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MarkPoint {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFieldMetadata {
    #[serde(default)]
    key: String,
    #[serde(default)]
    page_index: usize,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    field_number: String,
    #[serde(default)]
    multiline: Option<bool>,
    #[serde(default)]
    font: Option<String>,
    #[serde(default)]
    font_size: Option<f32>,
    #[serde(default)]
    align: Option<Align>,
    #[serde(default)]
    font_style: Option<String>,
    #[serde(default)]
    is_date: bool,
    #[serde(default)]
    is_day_count: bool,
    #[serde(default)]
    is_char_field: bool,
    #[serde(default)]
    char_width: Option<f32>,
    #[serde(default)]
    box_width: Option<f32>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    is_list: bool,
    #[serde(default)]
    start_y: Option<f32>,
    #[serde(default)]
    row_height: Option<f32>,
    #[serde(default)]
    max_rows: Option<usize>,
    #[serde(default)]
    columns: Vec<RawListColumn>,
    #[serde(default)]
    is_conditional: bool,
    #[serde(default)]
    condition_value: Option<FieldValue>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    options: Option<BTreeMap<String, MarkPoint>>,
    #[serde(default)]
    is_image: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListColumn {
    key: String,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    width: Option<f32>,
    #[serde(default)]
    align: Option<Align>,
    #[serde(default)]
    is_char_field: bool,
    #[serde(default)]
    char_width: Option<f32>,
    #[serde(default)]
    box_width: Option<f32>,
    #[serde(default)]
    limit: Option<usize>,
}

impl From<RawFieldMetadata> for FieldMetadata {
    fn from(raw: RawFieldMetadata) -> Self {
        let kind = resolve_kind(&raw);
        FieldMetadata {
            key: raw.key,
            page_index: raw.page_index,
            x: raw.x,
            y: raw.y,
            width: raw.width,
            height: raw.height,
            label: raw.label,
            field_number: raw.field_number,
            multiline: raw.multiline,
            font: raw.font,
            font_size: raw.font_size,
            align: raw.align.unwrap_or_default(),
            bold: raw
                .font_style
                .as_deref()
                .map(|style| style.eq_ignore_ascii_case("bold"))
                .unwrap_or(false),
            format: ValueFormat {
                date: raw.is_date,
                day_count: raw.is_day_count,
            },
            kind,
        }
    }
}

// Precedence follows the order the form generator has always tested the
// flags in: list, conditional, options, then image and char-box.
fn resolve_kind(raw: &RawFieldMetadata) -> FieldKind {
    if raw.is_list {
        return FieldKind::List(ListSpec {
            start_y: raw.start_y,
            row_height: raw.row_height,
            max_rows: raw.max_rows.filter(|rows| *rows > 0),
            columns: raw.columns.iter().map(ListColumn::from).collect(),
        });
    }
    if raw.is_conditional {
        let trigger = raw
            .condition_value
            .as_ref()
            .and_then(FieldValue::as_text)
            .unwrap_or_default();
        return FieldKind::Conditional(ConditionalSpec {
            trigger,
            text: raw.text.clone(),
        });
    }
    if let Some(marks) = raw.options.as_ref() {
        return FieldKind::Options(OptionsSpec {
            marks: marks.clone(),
            text: raw.text.clone(),
        });
    }
    if raw.is_image || raw.field_number.ends_with("Image") {
        return FieldKind::Image;
    }
    if raw.is_char_field {
        return FieldKind::CharBox(CharBoxSpec {
            char_width: raw.char_width,
            box_width: raw.box_width,
            limit: raw.limit,
        });
    }
    FieldKind::Plain
}

impl From<&RawListColumn> for ListColumn {
    fn from(raw: &RawListColumn) -> Self {
        ListColumn {
            key: raw.key.clone(),
            x: raw.x,
            width: raw.width.filter(|w| *w > 0.0),
            align: raw.align.unwrap_or_default(),
            char_box: raw.is_char_field.then_some(CharBoxSpec {
                char_width: raw.char_width,
                box_width: raw.box_width,
                limit: raw.limit,
            }),
        }
    }
}

impl FieldMetadata {
    /// A plain single-value field; the starting point for builders and tests.
    pub fn plain(field_number: impl Into<String>, x: f32, y: f32, width: f32, height: f32) -> Self {
        let field_number = field_number.into();
        FieldMetadata {
            key: format!("{field_number}-0"),
            page_index: 0,
            x,
            y,
            width,
            height,
            label: None,
            field_number,
            multiline: None,
            font: None,
            font_size: None,
            align: Align::Left,
            bold: false,
            format: ValueFormat::default(),
            kind: FieldKind::Plain,
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn with_page(mut self, page_index: usize) -> Self {
        self.page_index = page_index;
        self
    }
}

/// Parses a template's field metadata array. Missing properties take their
/// defaults; duplicate placement keys are reported but tolerated.
pub fn load_fields_json(raw: &str) -> Result<Vec<FieldMetadata>> {
    let fields: Vec<FieldMetadata> = serde_json::from_str(raw).map_err(|err| {
        FormStampError::InvalidFieldMetadata(format!("field metadata is not a valid array: {err}"))
    })?;
    let mut seen = BTreeSet::new();
    for field in &fields {
        if !field.key.is_empty() && !seen.insert(field.key.as_str()) {
            log::warn!("duplicate field key {:?} in metadata", field.key);
        }
        if let FieldKind::List(list) = &field.kind {
            if list.columns.is_empty() {
                log::warn!("list field {:?} declares no columns", field.key);
            }
        }
    }
    Ok(fields)
}

pub fn load_fields_path(path: impl AsRef<Path>) -> Result<Vec<FieldMetadata>> {
    let raw = std::fs::read_to_string(path)?;
    load_fields_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_field_defaults() {
        let fields = load_fields_json(
            r#"[{"key":"a","pageIndex":0,"x":50,"y":100,"width":120,"height":10,
                 "label":"Nome","fieldNumber":"10nome"}]"#,
        )
        .expect("parse");
        let field = &fields[0];
        assert_eq!(field.field_number, "10nome");
        assert_eq!(field.align, Align::Left);
        assert_eq!(field.font_size, None);
        assert_eq!(field.kind, FieldKind::Plain);
    }

    #[test]
    fn entries_without_key_are_tolerated() {
        let fields = load_fields_json(r#"[{"x":1,"y":2,"fieldNumber":"10nome"}]"#).expect("parse");
        assert_eq!(fields[0].key, "");
        assert_eq!(fields[0].width, 0.0);
    }

    #[test]
    fn list_takes_precedence_over_other_flags() {
        let fields = load_fields_json(
            r#"[{"key":"p","x":0,"y":0,"fieldNumber":"procedimentos","isList":true,
                 "isCharField":true,"startY":200,"rowHeight":5,"maxRows":5,
                 "columns":[{"key":"codigo","x":20,"isCharField":true,"limit":8},
                            {"key":"descricao","x":60,"width":80},
                            {"key":"quantidade","x":150,"align":"right"}]}]"#,
        )
        .expect("parse");
        let FieldKind::List(list) = &fields[0].kind else {
            panic!("expected list kind, got {:?}", fields[0].kind);
        };
        assert_eq!(list.start_y, Some(200.0));
        assert_eq!(list.columns.len(), 3);
        assert_eq!(list.columns[0].char_box.and_then(|c| c.limit), Some(8));
        assert_eq!(list.columns[1].width, Some(80.0));
        assert_eq!(list.columns[2].align, Align::Right);
    }

    #[test]
    fn conditional_trigger_accepts_numbers() {
        let fields = load_fields_json(
            r#"[{"key":"c","x":5,"y":5,"width":6,"height":6,"fieldNumber":"23tipodeinternacao",
                 "isConditional":true,"conditionValue":1}]"#,
        )
        .expect("parse");
        assert_eq!(
            fields[0].kind,
            FieldKind::Conditional(ConditionalSpec {
                trigger: "1".to_string(),
                text: None
            })
        );
    }

    #[test]
    fn options_image_and_char_box_kinds() {
        let fields = load_fields_json(
            r#"[{"key":"o","x":0,"y":0,"fieldNumber":"27tipodedoenca",
                 "options":{"A":{"x":10,"y":20},"C":{"x":30,"y":20}}},
                {"key":"s","x":0,"y":0,"width":40,"height":15,"fieldNumber":"assinaturaMedicoImage"},
                {"key":"d","x":0,"y":0,"fieldNumber":"doc","isCharField":true,"fontStyle":"bold"}]"#,
        )
        .expect("parse");
        assert!(matches!(&fields[0].kind, FieldKind::Options(o) if o.marks.len() == 2));
        assert_eq!(fields[1].kind, FieldKind::Image);
        assert!(matches!(fields[2].kind, FieldKind::CharBox(_)));
        assert!(fields[2].bold);
    }

    #[test]
    fn rejects_non_array_metadata() {
        let err = load_fields_json(r#"{"not":"an array"}"#).expect_err("invalid");
        assert!(matches!(err, FormStampError::InvalidFieldMetadata(_)));
    }
}
