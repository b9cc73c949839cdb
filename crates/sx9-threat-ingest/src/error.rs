//! Crate-wide error type.

use thiserror::Error;

/// Result type alias used throughout the ingestion engine.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that can occur while fetching, parsing, or storing threat intel.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Outbound HTTP request failed (DNS/TLS/connect/read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The destination store returned a non-2xx response.
    #[error("store error ({status}): {body}")]
    Store { status: u16, body: String },

    /// A source returned a non-2xx response.
    #[error("source error ({status}) from {source_name}: {body}")]
    Source {
        source_name: String,
        status: u16,
        body: String,
    },

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A parser could not make sense of the payload it was given.
    #[error("parse error: {0}")]
    Parse(String),

    /// The per-invocation subrequest budget is exhausted.
    #[error("subrequest budget exhausted")]
    BudgetExhausted,

    /// A required environment variable was not set.
    #[error("environment variable not set: {0}")]
    MissingEnv(String),

    /// A destination table or RPC does not exist.
    #[error("destination schema missing: {0}")]
    MissingSchema(String),
}

impl IngestError {
    /// True if this error reflects a destination table/relation that does
    /// not exist (PostgREST surfaces this as `42P01` or `"does not exist"`
    /// in the response body).
    pub fn is_missing_table(&self) -> bool {
        match self {
            IngestError::Store { body, .. } | IngestError::Source { body, .. } => {
                body.contains("42P01") || body.to_lowercase().contains("does not exist")
            }
            IngestError::MissingSchema(_) => true,
            _ => false,
        }
    }
}
