mod assemble;
mod canvas;
mod catalog;
mod config;
mod error;
mod field;
mod font;
mod image;
mod layout;
mod mapper;
mod output;
mod pdf;
mod render;
mod template;
mod trace;
mod types;
mod unify;
mod value;

pub use assemble::{Assembled, StampJob};
pub use canvas::{Canvas, Command, Page, TextRun};
pub use catalog::{KNOWN_PLANS, PlanAsset, PlanBundle, PlanCatalog, sha256_hex};
pub use config::{CharBoxDefaults, StampConfig, ViewportSource};
pub use error::{FormStampError, Result};
pub use field::{
    CharBoxSpec, ConditionalSpec, FieldKind, FieldMetadata, ListColumn, ListSpec, MarkPoint,
    OptionsSpec, ValueFormat, load_fields_json, load_fields_path,
};
pub use crate::image::{ImageFit, PdfImage, decode_image_bytes, decode_image_source, fit_image};
pub use layout::{Align, LaidOutLine, is_multiline_field};
pub use mapper::{
    Diagnosis, GuideData, MAX_DIAGNOSES, MAX_PROCEDURES, MAX_PROSTHETIC_ITEMS, Procedure,
    ProstheticItem, flatten,
};
pub use output::{
    Delivery, FileSink, OutputAction, OutputSink, guide_filename, output_filename,
    sanitize_filename_part,
};
pub use pdf::OverlaySummary;
pub use render::{DrawnField, RenderReport, SkipReason, SkippedField};
pub use template::{FlattenSummary, Template, TemplateInfo};
pub use trace::RenderTrace;
pub use types::{Color, Pt, Rect, Size};
pub use unify::{
    CoordinateUnifier, FixedViewport, NativeBox, PageGeometry, PageViewport, ViewerViewport,
};
pub use value::{FieldValue, Row, ValueMap};

use assemble::Assembler;
use font::{DEFAULT_FONT, FontRegistry};
use layout::{FontFace, LayoutRequest, layout_text};
use std::path::PathBuf;
use std::sync::Arc;

/// Stamps field values onto PDF templates. Immutable once built; share it
/// freely between threads.
#[derive(Debug, Clone)]
pub struct Stamper {
    config: StampConfig,
    font_registry: Arc<FontRegistry>,
    trace: Option<RenderTrace>,
}

#[derive(Debug, Clone, Default)]
pub struct StamperBuilder {
    config: StampConfig,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    trace_path: Option<PathBuf>,
}

impl Stamper {
    pub fn builder() -> StamperBuilder {
        StamperBuilder::new()
    }

    pub fn config(&self) -> &StampConfig {
        &self.config
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler {
            config: &self.config,
            fonts: self.font_registry.as_ref(),
            trace: self.trace.as_ref(),
        }
    }

    pub fn assemble(
        &self,
        template: &[u8],
        fields: &[FieldMetadata],
        values: &ValueMap,
    ) -> Result<Assembled> {
        self.assemble_job(&StampJob::new(template, fields, values))
    }

    pub fn assemble_job(&self, job: &StampJob<'_>) -> Result<Assembled> {
        self.assembler().assemble(job)
    }

    /// Flattens `data` with [`flatten`] and stamps the result.
    pub fn assemble_guide(
        &self,
        template: &[u8],
        fields: &[FieldMetadata],
        data: &GuideData,
    ) -> Result<Assembled> {
        let values = flatten(data);
        self.assemble(template, fields, &values)
    }

    /// Independent documents rendered in parallel. Results keep the order
    /// of `jobs`; one failure does not affect the others.
    pub fn assemble_batch(&self, jobs: &[StampJob<'_>]) -> Vec<Result<Assembled>> {
        use rayon::prelude::*;

        jobs.par_iter().map(|job| self.assemble_job(job)).collect()
    }

    pub fn deliver(
        &self,
        assembled: &Assembled,
        filename: &str,
        action: OutputAction,
        sink: &mut dyn OutputSink,
    ) -> Result<Delivery> {
        sink.deliver(&assembled.bytes, filename, action)
    }

    /// Loads `plan` from the catalog, stamps `data` onto it and hands the
    /// document to `sink` under the conventional guide file name.
    pub fn produce_guide(
        &self,
        catalog: &PlanCatalog,
        plan: &str,
        data: &GuideData,
        action: OutputAction,
        sink: &mut dyn OutputSink,
    ) -> Result<(Assembled, Delivery)> {
        let bundle = catalog.load(plan)?;
        let values = flatten(data);
        let job = StampJob::new(&bundle.template, &bundle.fields, &values)
            .with_auto_print(action.wants_auto_print())
            .with_label(&bundle.plan);
        let assembled = self.assemble_job(&job)?;
        let filename = guide_filename(&bundle.plan, data);
        let delivery = self.deliver(&assembled, &filename, action, sink)?;
        Ok((assembled, delivery))
    }

    /// Width of `text` in points. Unknown fonts measure with the default.
    pub fn measure_text(&self, font: &str, font_size: f32, text: &str) -> f32 {
        let name = self.font_name(font);
        FontFace::new(&self.font_registry, name, Pt::from_f32(font_size))
            .measure(text)
            .to_f32()
    }

    /// Lays `text` out in a `width` x `height` box exactly as a field of
    /// that size would be drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn layout_text(
        &self,
        text: &str,
        font: &str,
        font_size: f32,
        width: f32,
        height: f32,
        align: Align,
        multiline: Option<bool>,
    ) -> Vec<LaidOutLine> {
        let name = self.font_name(font);
        let face = FontFace::new(&self.font_registry, name, Pt::from_f32(font_size));
        layout_text(
            &face,
            &LayoutRequest {
                text,
                width: Pt::from_f32(width),
                height: Pt::from_f32(height),
                align,
                multiline: is_multiline_field(
                    multiline,
                    height,
                    self.config.multiline_height_threshold,
                ),
                line_height_factor: self.config.line_height_factor,
                ellipsis: &self.config.ellipsis,
            },
        )
    }

    fn font_name<'a>(&'a self, font: &'a str) -> &'a str {
        self.font_registry
            .canonical_name(font)
            .or_else(|| self.font_registry.canonical_name(&self.config.default_font))
            .unwrap_or(DEFAULT_FONT)
    }
}

impl StamperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every setting; font and trace paths in `config` are honored
    /// alongside the ones given to the builder.
    pub fn config(mut self, config: StampConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_font(mut self, name: impl Into<String>) -> Self {
        self.config.default_font = name.into();
        self
    }

    pub fn default_font_size(mut self, size: f32) -> Self {
        self.config.default_font_size = size;
        self
    }

    pub fn text_color(mut self, color: Color) -> Self {
        self.config.text_color = color;
        self
    }

    pub fn viewport(mut self, viewport: ViewportSource) -> Self {
        self.config.viewport = viewport;
        self
    }

    pub fn flatten_forms(mut self, enabled: bool) -> Self {
        self.config.flatten_forms = enabled;
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn trace_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Stamper> {
        self.config.validate()?;
        let mut registry = FontRegistry::new();
        for dir in self.config.font_dirs.iter().chain(&self.font_dirs) {
            let added = registry.register_dir(dir)?;
            log::debug!("registered {added} font(s) from {}", dir.display());
        }
        for file in self.config.font_files.iter().chain(&self.font_files) {
            registry.register_file(file)?;
        }
        if registry.resolve(&self.config.default_font).is_none() {
            return Err(FormStampError::InvalidConfiguration(format!(
                "default font {:?} is not registered",
                self.config.default_font
            )));
        }
        let trace = match self.trace_path.or_else(|| self.config.trace_path.clone()) {
            Some(path) => Some(RenderTrace::new(path)?),
            None => None,
        };
        Ok(Stamper {
            config: self.config,
            font_registry: Arc::new(registry),
            trace,
        })
    }
}
