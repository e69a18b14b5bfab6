//! # formstamp CLI
//!
//! Usage:
//!   formstamp --template t.pdf --fields f.json --data guide.json -o out.pdf
//!   formstamp --template t.pdf --fields f.json --values flat.json -o out.pdf
//!   formstamp --plan Amil --root ./guides --data guide.json [-o out_dir]
//!
//! Common flags: --config c.json, --action view|print|download,
//! --trace trace.jsonl, --sha256 HEX (plan mode).
//!
//! Warnings are printed by default; set `RUST_LOG=debug` for per-field detail.

use formstamp::{
    Assembled, FileSink, GuideData, OutputAction, PlanCatalog, StampConfig, StampJob, Stamper,
    ValueMap, load_fields_path,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Default)]
struct Args {
    template: Option<PathBuf>,
    fields: Option<PathBuf>,
    data: Option<PathBuf>,
    values: Option<PathBuf>,
    plan: Option<String>,
    root: Option<PathBuf>,
    sha256: Option<String>,
    action: OutputAction,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    trace: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("{}", usage());
        return ExitCode::SUCCESS;
    }
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("✗ {msg}\n\n{}", usage());
            return ExitCode::from(2);
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("✗ {msg}");
            ExitCode::FAILURE
        }
    }
}

fn usage() -> &'static str {
    "usage:\n  formstamp --template T.pdf --fields F.json (--data GUIDE.json | --values FLAT.json) [-o OUT.pdf]\n  formstamp --plan NAME [--root DIR] [--sha256 HEX] --data GUIDE.json [-o OUT_DIR]\noptions: --config C.json --action view|print|download --trace TRACE.jsonl"
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = raw.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match flag.as_str() {
            "--template" => args.template = Some(value()?.into()),
            "--fields" => args.fields = Some(value()?.into()),
            "--data" => args.data = Some(value()?.into()),
            "--values" => args.values = Some(value()?.into()),
            "--plan" => args.plan = Some(value()?),
            "--root" => args.root = Some(value()?.into()),
            "--sha256" => args.sha256 = Some(value()?),
            "--action" => {
                args.action = value()?.parse().map_err(|err| format!("{err}"))?;
            }
            "-o" | "--output" => args.output = Some(value()?.into()),
            "--config" => args.config = Some(value()?.into()),
            "--trace" => args.trace = Some(value()?.into()),
            other => return Err(format!("unknown argument {other}")),
        }
    }
    if args.plan.is_none() && (args.template.is_none() || args.fields.is_none()) {
        return Err("either --plan or both --template and --fields are required".to_string());
    }
    if args.data.is_none() && args.values.is_none() {
        return Err("one of --data or --values is required".to_string());
    }
    Ok(args)
}

fn run(args: Args) -> Result<(), String> {
    let config = match &args.config {
        Some(path) => StampConfig::from_json_path(path).map_err(|err| err.to_string())?,
        None => StampConfig::default(),
    };
    let mut builder = Stamper::builder().config(config);
    if let Some(path) = &args.trace {
        builder = builder.trace_log(path);
    }
    let stamper = builder.build().map_err(|err| err.to_string())?;

    if let Some(plan) = &args.plan {
        return run_plan(&stamper, plan, &args);
    }

    let (Some(template_path), Some(fields_path)) = (&args.template, &args.fields) else {
        return Err("--template and --fields are required".to_string());
    };
    let template = fs::read(template_path)
        .map_err(|err| format!("failed to read {}: {err}", template_path.display()))?;
    let fields = load_fields_path(fields_path).map_err(|err| err.to_string())?;
    let values = read_values(&args)?;
    let job = StampJob::new(&template, &fields, &values)
        .with_auto_print(args.action.wants_auto_print())
        .with_label("cli");
    let assembled = stamper.assemble_job(&job).map_err(|err| err.to_string())?;
    print_report(&assembled);

    let output = args.output.unwrap_or_else(|| PathBuf::from("output.pdf"));
    fs::write(&output, &assembled.bytes)
        .map_err(|err| format!("failed to write {}: {err}", output.display()))?;
    eprintln!(
        "✓ {}: wrote {} bytes to {}",
        args.action,
        assembled.bytes.len(),
        output.display()
    );
    Ok(())
}

fn run_plan(stamper: &Stamper, plan: &str, args: &Args) -> Result<(), String> {
    let Some(data_path) = &args.data else {
        return Err("--plan needs --data with a guide record".to_string());
    };
    let data = GuideData::from_json_str(&read_text(data_path)?).map_err(|err| err.to_string())?;
    let mut catalog = PlanCatalog::new(args.root.clone().unwrap_or_else(|| PathBuf::from(".")));
    if let Some(digest) = &args.sha256 {
        catalog.pin(plan, digest).map_err(|err| err.to_string())?;
    }
    let mut sink = FileSink::new(args.output.clone().unwrap_or_else(|| PathBuf::from(".")));
    let (assembled, delivery) = stamper
        .produce_guide(&catalog, plan, &data, args.action, &mut sink)
        .map_err(|err| err.to_string())?;
    print_report(&assembled);
    let path = delivery
        .path
        .map(|path| path.display().to_string())
        .unwrap_or(delivery.filename);
    eprintln!("✓ {}: wrote {} bytes to {path}", delivery.action, delivery.byte_len);
    Ok(())
}

fn read_text(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()))
}

fn read_values(args: &Args) -> Result<ValueMap, String> {
    if let Some(path) = &args.values {
        return ValueMap::from_json_str(&read_text(path)?).map_err(|err| err.to_string());
    }
    match &args.data {
        Some(path) => {
            let data = GuideData::from_json_str(&read_text(path)?).map_err(|err| err.to_string())?;
            Ok(formstamp::flatten(&data))
        }
        None => Ok(ValueMap::new()),
    }
}

fn print_report(assembled: &Assembled) {
    for line in report_lines(assembled) {
        eprintln!("{line}");
    }
}

fn report_lines(assembled: &Assembled) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(flatten) = &assembled.flatten {
        lines.push(format!(
            "  form flattened: {} widget(s) painted, {} dropped",
            flatten.widgets_painted, flatten.widgets_dropped
        ));
    }
    let report = &assembled.report;
    lines.push(format!(
        "  {} field(s) drawn ({} draw calls), {} skipped",
        report.drawn.len(),
        report.draw_calls(),
        report.skipped.len()
    ));
    for skipped in &report.skipped {
        lines.push(format!(
            "  - {} ({}): {}",
            skipped.field_number, skipped.key, skipped.reason
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use formstamp::{FlattenSummary, OverlaySummary, RenderReport, SkipReason, SkippedField};

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_template_mode() {
        let args = parse_args(&strings(&[
            "--template", "t.pdf", "--fields", "f.json", "--values", "v.json", "--action", "print",
            "-o", "out.pdf",
        ]))
        .expect("args");
        assert_eq!(args.template, Some(PathBuf::from("t.pdf")));
        assert_eq!(args.action, OutputAction::Print);
        assert_eq!(args.output, Some(PathBuf::from("out.pdf")));
    }

    #[test]
    fn report_mentions_flattening_and_skips() {
        let assembled = Assembled {
            bytes: Vec::new(),
            report: RenderReport {
                drawn: Vec::new(),
                skipped: vec![SkippedField {
                    key: "uf".to_string(),
                    field_number: "18uf".to_string(),
                    page_index: 0,
                    reason: SkipReason::NothingToDraw,
                }],
            },
            overlay: OverlaySummary::default(),
            flatten: Some(FlattenSummary {
                widgets_painted: 3,
                widgets_dropped: 1,
                acroform_removed: true,
            }),
        };
        let lines = report_lines(&assembled);
        assert_eq!(lines[0], "  form flattened: 3 widget(s) painted, 1 dropped");
        assert_eq!(lines[1], "  0 field(s) drawn (0 draw calls), 1 skipped");
        assert_eq!(lines[2], "  - 18uf (uf): value leaves nothing to draw");
    }

    #[test]
    fn rejects_incomplete_invocations() {
        assert!(parse_args(&strings(&["--template", "t.pdf", "--data", "d.json"])).is_err());
        assert!(parse_args(&strings(&["--plan", "Amil"])).is_err());
        assert!(parse_args(&strings(&["--plan", "Amil", "--data"])).is_err());
        assert!(parse_args(&strings(&["--plan", "Amil", "--data", "d", "--action", "fax"])).is_err());
        assert!(parse_args(&strings(&["--plan", "Amil", "--data", "d", "--bogus"])).is_err());
    }
}
