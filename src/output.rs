//! Output actions and sinks for finished documents.

use crate::error::{FormStampError, Result};
use crate::mapper::GuideData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputAction {
    /// Open in a viewer.
    View,
    /// Open with the print dialog raised.
    Print,
    #[default]
    Download,
}

impl OutputAction {
    /// The print action is carried inside the document as an open action.
    pub fn wants_auto_print(self) -> bool {
        self == OutputAction::Print
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputAction::View => "view",
            OutputAction::Print => "print",
            OutputAction::Download => "download",
        }
    }
}

impl fmt::Display for OutputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputAction {
    type Err = FormStampError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(OutputAction::View),
            "print" => Ok(OutputAction::Print),
            "download" => Ok(OutputAction::Download),
            other => Err(FormStampError::InvalidConfiguration(format!(
                "unknown output action {other:?} (expected view, print or download)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub action: OutputAction,
    pub filename: String,
    /// Where the bytes landed, for sinks that write files.
    pub path: Option<PathBuf>,
    pub byte_len: usize,
}

/// Accepts finished document bytes. Sinks hold no render state; the same
/// sink can receive any number of documents.
pub trait OutputSink {
    fn deliver(&mut self, bytes: &[u8], filename: &str, action: OutputAction) -> Result<Delivery>;
}

/// Writes every document into one directory. Viewing and printing are left
/// to whoever opens the file; the action only shows up in the returned
/// [`Delivery`].
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for FileSink {
    fn deliver(&mut self, bytes: &[u8], filename: &str, action: OutputAction) -> Result<Delivery> {
        let name = Path::new(filename)
            .file_name()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                FormStampError::InvalidConfiguration(format!("invalid output filename {filename:?}"))
            })?;
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        fs::write(&path, bytes)?;
        log::info!("{action}: wrote {} bytes to {}", bytes.len(), path.display());
        Ok(Delivery {
            action,
            filename: name.to_string_lossy().into_owned(),
            path: Some(path),
            byte_len: bytes.len(),
        })
    }
}

/// Whitespace runs become `_`; anything outside `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_filename_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        }
    }
    out
}

/// `Guia_<plan>_<patient>_<requester>_<date>.pdf`. Missing names fall back
/// to `Paciente` and `Solicitante`; a missing date to today's ISO date.
pub fn output_filename(
    plan: &str,
    patient: Option<&str>,
    requester: Option<&str>,
    date: Option<&str>,
) -> String {
    let part = |value: Option<&str>, fallback: &str| {
        let cleaned = sanitize_filename_part(value.unwrap_or_default());
        if cleaned.is_empty() {
            sanitize_filename_part(fallback)
        } else {
            cleaned
        }
    };
    let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
    format!(
        "Guia_{}_{}_{}_{}.pdf",
        part(Some(plan), "Plano"),
        part(patient, "Paciente"),
        part(requester, "Solicitante"),
        part(date, &today),
    )
}

/// File name for a guide, taken from the beneficiary, the requesting
/// professional and the request date.
pub fn guide_filename(plan: &str, data: &GuideData) -> String {
    let date = data.data_solicitacao.trim();
    let date = date.split('T').next().filter(|date| !date.is_empty());
    output_filename(
        plan,
        Some(data.nome_beneficiario.as_str()),
        Some(data.nome_profissional_solicitante.as_str()),
        date,
    )
}
