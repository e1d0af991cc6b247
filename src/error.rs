use thiserror::Error;

pub type Result<T> = std::result::Result<T, PrepError>;

// Everything that can stop a workload from being prepared.
// Shortfalls (fewer requests than asked for) are only logged, never raised.
#[derive(Debug, Error)]
pub enum PrepError {
    // Extraction rules that can never work, whatever the records look like
    #[error("configuration error: {0}")]
    Configuration(String),

    // A configured key is absent from a record
    #[error(
        "Dataset {dataset} does not have key '{key}'. \
         Please set {flag} to one of the available keys: {available:?}"
    )]
    MissingField {
        dataset: String,
        key: String,
        flag: &'static str,
        available: Vec<String>,
    },

    // The record source rejected the query (bad config/split, HTTP failure ...)
    #[error("dataset source error: {message}{}", fmt_hint(.hint))]
    DatasetSource {
        message: String,
        hint: Option<String>,
    },

    // Malformed command-line value, caught before any record is read
    #[error("{0}")]
    Usage(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn fmt_hint(hint: &Option<String>) -> String {
    hint.as_deref().map(|h| format!("\n {h}")).unwrap_or_default()
}

impl PrepError {
    pub fn source_error(message: impl Into<String>) -> Self {
        PrepError::DatasetSource { message: message.into(), hint: None }
    }

    pub fn source_error_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        PrepError::DatasetSource {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}
