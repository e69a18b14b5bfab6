use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormStampError {
    #[error("template is not a loadable pdf: {0}")]
    TemplateLoad(String),
    #[error("template pdf is encrypted")]
    TemplateEncrypted,
    #[error("template pdf has no pages")]
    EmptyTemplate,
    #[error("field {key} targets page {page_index} but the template has {page_count} page(s)")]
    PageOutOfRange {
        key: String,
        page_index: usize,
        page_count: usize,
    },
    #[error("invalid field metadata: {0}")]
    InvalidFieldMetadata(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("integrity check failed for {subject}: expected {expected}, found {found}")]
    Integrity {
        subject: String,
        expected: String,
        found: String,
    },
    #[error("unknown plan: {0}")]
    UnknownPlan(String),
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FormStampError>;
