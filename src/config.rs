use crate::error::{FormStampError, Result};
use crate::types::Color;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the rendered-view dimensions of a page are obtained for coordinate
/// unification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ViewportSource {
    /// Measure each page the way a generic viewer renders it at 100% scale.
    #[default]
    Viewer,
    /// Use the canvas dimensions the mapping editor recorded.
    Fixed { width: f32, height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharBoxDefaults {
    pub char_width: f32,
    pub box_width: f32,
    pub limit: usize,
}

impl Default for CharBoxDefaults {
    fn default() -> Self {
        Self {
            char_width: 4.0,
            box_width: 3.0,
            limit: 10,
        }
    }
}

/// Every tunable of a render. Passed explicitly to the assembler; nothing in
/// the crate reads process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StampConfig {
    pub default_font: String,
    pub default_font_size: f32,
    /// Boxes taller than this (in rendered units) wrap even without a
    /// `multiline` flag.
    pub multiline_height_threshold: f32,
    pub line_height_factor: f32,
    pub ellipsis: String,
    /// chrono format string for date fields.
    pub date_format: String,
    /// Field numbers whose zero value is drawn as [`StampConfig::day_clinic_text`].
    pub day_clinic_fields: Vec<String>,
    pub day_clinic_text: String,
    pub char_box: CharBoxDefaults,
    pub image_box_width: f32,
    pub image_box_height: f32,
    pub list_row_height: f32,
    /// Rows whose list key matches get a zero quantity drawn blank.
    pub blank_zero_quantity_lists: Vec<String>,
    pub text_color: Color,
    pub conditional_mark: String,
    pub option_mark: String,
    pub flatten_forms: bool,
    pub viewport: ViewportSource,
    pub font_files: Vec<PathBuf>,
    pub font_dirs: Vec<PathBuf>,
    pub trace_path: Option<PathBuf>,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            default_font: crate::font::DEFAULT_FONT.to_string(),
            default_font_size: 9.0,
            multiline_height_threshold: 30.0,
            line_height_factor: 1.2,
            ellipsis: "...".to_string(),
            date_format: "%d/%m/%Y".to_string(),
            day_clinic_fields: vec![
                "25qtdediariassolicitadas".to_string(),
                "qtdeDiariasSolicitadas".to_string(),
            ],
            day_clinic_text: "Day Clinic".to_string(),
            char_box: CharBoxDefaults::default(),
            image_box_width: 40.0,
            image_box_height: 15.0,
            list_row_height: 5.0,
            blank_zero_quantity_lists: vec!["opm".to_string()],
            text_color: Color::BLACK,
            conditional_mark: "X".to_string(),
            option_mark: "X".to_string(),
            flatten_forms: true,
            viewport: ViewportSource::Viewer,
            font_files: Vec::new(),
            font_dirs: Vec::new(),
            trace_path: None,
        }
    }
}

impl StampConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: StampConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_font_size.is_finite() && self.default_font_size > 0.0) {
            return Err(FormStampError::InvalidConfiguration(format!(
                "defaultFontSize must be > 0 (got {})",
                self.default_font_size
            )));
        }
        if !(self.line_height_factor.is_finite() && self.line_height_factor > 0.0) {
            return Err(FormStampError::InvalidConfiguration(format!(
                "lineHeightFactor must be > 0 (got {})",
                self.line_height_factor
            )));
        }
        if !self.multiline_height_threshold.is_finite() || self.multiline_height_threshold < 0.0 {
            return Err(FormStampError::InvalidConfiguration(format!(
                "multilineHeightThreshold must be >= 0 (got {})",
                self.multiline_height_threshold
            )));
        }
        if self.default_font.trim().is_empty() {
            return Err(FormStampError::InvalidConfiguration(
                "defaultFont cannot be empty".to_string(),
            ));
        }
        if let ViewportSource::Fixed { width, height } = self.viewport {
            if !(width.is_finite() && height.is_finite()) || width < 0.0 || height < 0.0 {
                return Err(FormStampError::InvalidConfiguration(format!(
                    "fixed viewport must be finite and non-negative (got {width}x{height})"
                )));
            }
        }
        Ok(())
    }

    pub fn is_day_clinic_field(&self, field_number: &str) -> bool {
        self.day_clinic_fields.iter().any(|f| f == field_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_form_conventions() {
        let config = StampConfig::default();
        assert_eq!(config.default_font_size, 9.0);
        assert_eq!(config.multiline_height_threshold, 30.0);
        assert_eq!(config.line_height_factor, 1.2);
        assert!(config.is_day_clinic_field("25qtdediariassolicitadas"));
        assert!(!config.is_day_clinic_field("10nome"));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StampConfig::from_json_str(
            r#"{"defaultFontSize": 8, "viewport": {"kind": "fixed", "width": 300, "height": 425}}"#,
        )
        .expect("parse");
        assert_eq!(config.default_font_size, 8.0);
        assert_eq!(config.ellipsis, "...");
        assert_eq!(
            config.viewport,
            ViewportSource::Fixed {
                width: 300.0,
                height: 425.0
            }
        );
    }

    #[test]
    fn rejects_non_positive_font_size() {
        let err = StampConfig::from_json_str(r#"{"defaultFontSize": 0}"#).expect_err("invalid");
        assert!(matches!(err, FormStampError::InvalidConfiguration(_)));
    }
}
