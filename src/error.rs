//! Error types for the holdings pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("unknown investor category '{name}' (valid: {valid})")]
    UnknownCategory { name: String, valid: String },

    #[error("unknown quarter '{label}' (valid: {valid})")]
    UnknownQuarter { label: String, valid: String },

    #[error("no filings could be fetched for {category} {quarter}")]
    NoFilings { category: String, quarter: String },

    #[error("enrichment failed: {0}")]
    Enrichment(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
