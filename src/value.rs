use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a list/table value, keyed by column key.
pub type Row = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Rows(Vec<Row>),
}

impl FieldValue {
    /// Display text of a scalar; `None` for row lists.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Number(value) => Some(format_number(*value)),
            FieldValue::Text(value) => Some(value.clone()),
            FieldValue::Rows(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(value) => value.trim().parse::<f64>().ok(),
            FieldValue::Rows(_) => None,
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            FieldValue::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Blank values are never drawn.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Number(value) => !value.is_finite(),
            FieldValue::Text(value) => value.trim().is_empty(),
            FieldValue::Rows(rows) => rows.is_empty(),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<Vec<Row>> for FieldValue {
    fn from(rows: Vec<Row>) -> Self {
        FieldValue::Rows(rows)
    }
}

/// Field identifier to value. Absence is the "do not draw" signal, so the
/// map is expected to hold no blank entries; lookups treat blanks as absent
/// regardless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap(BTreeMap<String, FieldValue>);

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Inserts only non-blank values.
    pub fn insert_present(&mut self, key: impl Into<String>, value: Option<FieldValue>) {
        if let Some(value) = value.filter(|v| !v.is_blank()) {
            self.0.insert(key.into(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// The value for `key` when it exists and is not blank.
    pub fn drawable(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key).filter(|value| !value.is_blank())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, FieldValue)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_display_without_trailing_zero() {
        assert_eq!(FieldValue::from(2).as_text().as_deref(), Some("2"));
        assert_eq!(FieldValue::from(2.5).as_text().as_deref(), Some("2.5"));
        assert_eq!(FieldValue::from("0").as_number(), Some(0.0));
    }

    #[test]
    fn blank_values_are_not_drawable() {
        let mut map = ValueMap::new();
        map.insert("a", "   ");
        map.insert("b", "x");
        map.insert("c", 0);
        assert!(map.drawable("a").is_none());
        assert!(map.drawable("missing").is_none());
        assert!(map.drawable("b").is_some());
        assert!(map.drawable("c").is_some());
    }

    #[test]
    fn insert_present_skips_blanks() {
        let mut map = ValueMap::new();
        map.insert_present("a", Some(FieldValue::from("")));
        map.insert_present("b", None);
        map.insert_present("c", Some(FieldValue::from("ok")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn parses_mixed_json_values() {
        let map = ValueMap::from_json_str(
            r#"{"10nome": "Maria", "25qtdediariassolicitadas": 0,
                "procedimentos": [{"codigo": "10101012", "quantidade": 2}]}"#,
        )
        .expect("parse");
        assert_eq!(map.get("25qtdediariassolicitadas"), Some(&FieldValue::Number(0.0)));
        let rows = map.get("procedimentos").and_then(FieldValue::rows).expect("rows");
        assert_eq!(rows[0].get("quantidade"), Some(&FieldValue::Number(2.0)));
    }
}
