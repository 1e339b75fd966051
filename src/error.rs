//! Error types for the reviewer invoice workflow.

use thiserror::Error;

/// Problems with the environment-sourced run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Placeholder substitution failures in message and table-name templates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown placeholder {{{0}}} in template")]
    UnknownPlaceholder(String),

    #[error("Unbalanced '{0}' at byte {1} in template")]
    UnbalancedBrace(char, usize),

    #[error("Template is missing required placeholder {{{0}}}")]
    MissingPlaceholder(String),
}

/// Invoice API failures.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("Invalid API token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invoice request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invoice API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invoice payload does not match the expected shape: {0}")]
    Shape(String),
}

/// Google OAuth, Sheets and Drive failures.
#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("Google request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Google API returned status {status} for {what}: {body}")]
    Status {
        what: String,
        status: u16,
        body: String,
    },

    #[error("Failed to read or write {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed Google credentials: {0}")]
    Credentials(String),

    #[error("Invalid URL {0}")]
    InvalidUrl(String),

    #[error("OAuth authorization failed: {0}")]
    Authorization(String),
}
