//! Document assembler: template in, stamped bytes out.
//!
//! This is the one place that decides what is fatal. Template load errors
//! and fields aimed at pages the template does not have fail the whole
//! document; everything the renderer reports per field is kept in the
//! [`RenderReport`] and the document is still produced.

use crate::canvas::Canvas;
use crate::config::{StampConfig, ViewportSource};
use crate::error::{FormStampError, Result};
use crate::field::FieldMetadata;
use crate::font::FontRegistry;
use crate::pdf::{OverlaySummary, write_overlay};
use crate::render::{FieldRenderer, RenderReport};
use crate::template::{FlattenSummary, Template};
use crate::trace::{RenderTrace, TraceScope};
use crate::types::Size;
use crate::unify::{CoordinateUnifier, FixedViewport, PageViewport, ViewerViewport};
use crate::value::ValueMap;
use std::time::Instant;

/// One document to stamp.
#[derive(Debug, Clone, Copy)]
pub struct StampJob<'a> {
    pub template: &'a [u8],
    pub fields: &'a [FieldMetadata],
    pub values: &'a ValueMap,
    /// Embed a `/Print` open action.
    pub auto_print: bool,
    /// Name used in trace lines.
    pub label: &'a str,
}

impl<'a> StampJob<'a> {
    pub fn new(template: &'a [u8], fields: &'a [FieldMetadata], values: &'a ValueMap) -> Self {
        Self {
            template,
            fields,
            values,
            auto_print: false,
            label: "document",
        }
    }

    pub fn with_auto_print(mut self, enabled: bool) -> Self {
        self.auto_print = enabled;
        self
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Assembled {
    pub bytes: Vec<u8>,
    pub report: RenderReport,
    pub overlay: OverlaySummary,
    /// `None` when flattening was disabled, not needed, or failed.
    pub flatten: Option<FlattenSummary>,
}

pub(crate) struct Assembler<'a> {
    pub(crate) config: &'a StampConfig,
    pub(crate) fonts: &'a FontRegistry,
    pub(crate) trace: Option<&'a RenderTrace>,
}

impl Assembler<'_> {
    pub(crate) fn assemble(&self, job: &StampJob<'_>) -> Result<Assembled> {
        let started = Instant::now();
        let mut scope = self.trace.map(|trace| trace.scope(job.label));
        let result = self.assemble_inner(job, scope.as_mut());
        if let Some(scope) = scope {
            scope.span_ms("assemble", started.elapsed().as_secs_f64() * 1000.0);
            scope.finish();
        }
        result
    }

    fn assemble_inner(
        &self,
        job: &StampJob<'_>,
        mut trace: Option<&mut TraceScope<'_>>,
    ) -> Result<Assembled> {
        let mut template = Template::load(job.template)?;
        let flatten = self.flatten(&mut template, job.label, trace.as_deref_mut());
        let page_count = template.page_count();

        let viewport = viewport_for(self.config.viewport);
        let mut pages = Vec::with_capacity(page_count);
        for page_index in 0..page_count {
            let geometry = template.page_geometry(page_index).ok_or_else(|| {
                FormStampError::TemplateLoad(format!("page {page_index} could not be resolved"))
            })?;
            let unifier = CoordinateUnifier::for_page(&geometry, viewport.as_ref());
            if let Some(trace) = trace.as_deref_mut() {
                trace.unify_scale(page_index, &unifier);
            }
            pages.push(unifier);
        }

        let mut canvas = Canvas::new(page_count);
        let report =
            FieldRenderer::new(self.config, self.fonts, &pages).render(&mut canvas, job.fields, job.values);
        if let Some(trace) = trace {
            trace.report(&report);
        }
        if let Some(missing) = report.first_missing_page() {
            return Err(FormStampError::PageOutOfRange {
                key: missing.key.clone(),
                page_index: missing.page_index,
                page_count,
            });
        }

        template.isolate_page_contents()?;
        let overlay = write_overlay(&mut template, canvas, self.fonts)?;
        if job.auto_print {
            template.set_auto_print()?;
        }
        let bytes = template.into_bytes()?;
        log::debug!(
            "assembled {}: {} field(s) drawn, {} skipped, {} bytes",
            job.label,
            report.drawn.len(),
            report.skipped.len(),
            bytes.len()
        );
        Ok(Assembled {
            bytes,
            report,
            overlay,
            flatten,
        })
    }

    /// Failures leave the template as loaded.
    fn flatten(
        &self,
        template: &mut Template,
        label: &str,
        trace: Option<&mut TraceScope<'_>>,
    ) -> Option<FlattenSummary> {
        if !self.config.flatten_forms || !template.has_form_fields() {
            return None;
        }
        match template.flatten_form_fields() {
            Ok(summary) => {
                if let Some(trace) = trace {
                    trace.flatten(Ok(&summary));
                }
                Some(summary)
            }
            Err(err) => {
                log::warn!("form flattening failed for {label}, stamping unflattened template: {err}");
                if let Some(trace) = trace {
                    trace.flatten(Err(err.to_string()));
                }
                None
            }
        }
    }
}

fn viewport_for(source: ViewportSource) -> Box<dyn PageViewport> {
    match source {
        ViewportSource::Viewer => Box::new(ViewerViewport),
        ViewportSource::Fixed { width, height } => Box::new(FixedViewport(Size::new(width, height))),
    }
}
