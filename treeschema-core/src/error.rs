//! Error types for the Tree Schema client.
//!
//! Uses `thiserror` for public API error types. Catalog-level outcomes
//! (missing records, conflicts, invalid payloads, job failures) live on
//! [`TreeSchemaError`]; transport failures are grouped under [`ApiError`].

use std::path::PathBuf;

use crate::credentials::CredentialError;

/// Top-level error type for the Tree Schema client library.
#[derive(Debug, thiserror::Error)]
pub enum TreeSchemaError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: String },

    #[error("{kind} already exists: {key}")]
    Conflict { kind: String, key: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Timed out after {waited_secs:.1}s waiting for manifest processing")]
    Timeout { waited_secs: f64 },

    #[error("Manifest process {process_id} failed on the server: {message}")]
    RemoteProcessing { process_id: i64, message: String },

    #[error("Invalid state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TreeSchemaError {
    pub fn not_found(kind: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error reports a natural-key collision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors from the HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API request failed: {message}")]
    Request { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for account {account}")]
    AuthFailed { account: String },

    #[error("Rate limited by server, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `TreeSchemaError`.
pub type Result<T> = std::result::Result<T, TreeSchemaError>;
