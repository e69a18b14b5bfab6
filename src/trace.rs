use crate::render::RenderReport;
use crate::template::FlattenSummary;
use crate::unify::CoordinateUnifier;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Append-only JSONL log of render decisions. Cheap to clone; clones share
/// one writer, so concurrent renders interleave whole lines.
#[derive(Clone)]
pub struct RenderTrace {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for RenderTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTrace").finish_non_exhaustive()
    }
}

impl RenderTrace {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    fn write_line(&self, value: serde_json::Value) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{value}");
        }
    }

    /// Starts the events of one document. Counters live in the scope, so
    /// documents assembled in parallel never share a summary.
    pub(crate) fn scope<'a>(&'a self, document: &'a str) -> TraceScope<'a> {
        TraceScope {
            trace: self,
            document,
            counters: BTreeMap::new(),
        }
    }

    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

pub(crate) struct TraceScope<'a> {
    trace: &'a RenderTrace,
    document: &'a str,
    counters: BTreeMap<String, u64>,
}

impl TraceScope<'_> {
    pub(crate) fn increment(&mut self, key: &str, amount: u64) {
        let entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub(crate) fn unify_scale(&mut self, page_index: usize, unifier: &CoordinateUnifier) {
        let (scale_x, scale_y) = unifier.scale();
        let crop = unifier.crop_box();
        self.trace.write_line(json!({
            "type": "unify.scale",
            "document": self.document,
            "page": page_index,
            "scaleX": scale_x,
            "scaleY": scale_y,
            "identityFallback": unifier.is_identity_fallback(),
            "cropBox": [crop.x.to_f32(), crop.y.to_f32(), crop.width.to_f32(), crop.height.to_f32()],
        }));
        if unifier.is_identity_fallback() {
            self.increment("unify.identity_fallback", 1);
        }
    }

    pub(crate) fn flatten(&mut self, outcome: Result<&FlattenSummary, String>) {
        let line = match outcome {
            Ok(summary) => json!({
                "type": "template.flatten",
                "document": self.document,
                "ok": true,
                "widgetsPainted": summary.widgets_painted,
                "widgetsDropped": summary.widgets_dropped,
                "acroformRemoved": summary.acroform_removed,
            }),
            Err(error) => {
                self.increment("template.flatten_failed", 1);
                json!({
                    "type": "template.flatten",
                    "document": self.document,
                    "ok": false,
                    "error": error,
                })
            }
        };
        self.trace.write_line(line);
    }

    pub(crate) fn report(&mut self, report: &RenderReport) {
        for field in &report.drawn {
            self.trace.write_line(json!({
                "type": "field.drawn",
                "document": self.document,
                "key": field.key,
                "fieldNumber": field.field_number,
                "page": field.page_index,
                "drawCalls": field.draw_calls,
            }));
        }
        for field in &report.skipped {
            self.trace.write_line(json!({
                "type": "field.skipped",
                "document": self.document,
                "key": field.key,
                "fieldNumber": field.field_number,
                "page": field.page_index,
                "reason": field.reason,
            }));
        }
        self.increment("field.drawn", report.drawn.len() as u64);
        self.increment("field.skipped", report.skipped.len() as u64);
        self.increment("draw.calls", report.draw_calls() as u64);
    }

    pub(crate) fn span_ms(&self, name: &str, ms: f64) {
        self.trace.write_line(json!({
            "type": "trace.span",
            "name": name,
            "document": self.document,
            "unit": "ms",
            "ms": (ms * 1000.0).round() / 1000.0,
        }));
    }

    /// Writes this document's counters and flushes the shared writer.
    pub(crate) fn finish(self) {
        self.trace.write_line(json!({
            "type": "trace.summary",
            "context": self.document,
            "counts": self.counters,
        }));
        self.trace.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{DrawnField, SkipReason, SkippedField};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut inner) = self.0.lock() {
                inner.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lines(buf: &SharedBuf) -> Vec<serde_json::Value> {
        let bytes = buf.0.lock().expect("lock").clone();
        String::from_utf8(bytes)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    fn sample_report(draw_calls: usize) -> RenderReport {
        RenderReport {
            drawn: vec![DrawnField {
                key: "a".to_string(),
                field_number: "10nome".to_string(),
                page_index: 0,
                draw_calls,
            }],
            skipped: vec![SkippedField {
                key: "b".to_string(),
                field_number: "52datadeemissao".to_string(),
                page_index: 0,
                reason: SkipReason::UnparseableDate,
            }],
        }
    }

    #[test]
    fn report_events_and_summary_counts() {
        let buf = SharedBuf::default();
        let trace = RenderTrace::from_writer(buf.clone());
        let mut scope = trace.scope("guide");
        scope.report(&sample_report(2));
        scope.finish();

        let lines = lines(&buf);
        assert_eq!(lines[0]["type"], "field.drawn");
        assert_eq!(lines[0]["document"], "guide");
        assert_eq!(lines[1]["reason"]["reason"], "unparseableDate");
        assert_eq!(lines[2]["type"], "trace.summary");
        assert_eq!(lines[2]["counts"]["draw.calls"], 2);
        assert_eq!(lines[2]["counts"]["field.skipped"], 1);
    }

    #[test]
    fn interleaved_documents_keep_separate_counts() {
        let buf = SharedBuf::default();
        let trace = RenderTrace::from_writer(buf.clone());
        let mut first = trace.scope("first");
        let mut second = trace.scope("second");
        first.report(&sample_report(3));
        second.report(&sample_report(5));
        second.finish();
        first.finish();

        let summaries: Vec<serde_json::Value> = lines(&buf)
            .into_iter()
            .filter(|line| line["type"] == "trace.summary")
            .collect();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0]["context"], "second");
        assert_eq!(summaries[0]["counts"]["draw.calls"], 5);
        assert_eq!(summaries[1]["context"], "first");
        assert_eq!(summaries[1]["counts"]["draw.calls"], 3);
        assert_eq!(summaries[1]["counts"]["field.drawn"], 1);
    }

    #[test]
    fn empty_scope_summarises_nothing() {
        let buf = SharedBuf::default();
        let trace = RenderTrace::from_writer(buf.clone());
        trace.scope("blank").finish();
        assert_eq!(lines(&buf)[0]["counts"], json!({}));
    }
}
