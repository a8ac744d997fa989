//! Error types for claims, parameter merging, credentials and upgrades.

use std::io;

use thiserror::Error;

/// Errors raised by the claim store.
#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("installation '{0}' not found")]
    NotFound(String),

    #[error("invalid installation name '{0}': use letters, digits, '.', '_' and '-'")]
    InvalidName(String),

    #[error("failed to access claim '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize claim '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse claim '{name}': {source}")]
    Deserialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while merging parameter sources against a bundle schema.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter '{0}' is not defined by the bundle")]
    UnknownParameter(String),

    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("required parameter '{0}' has no value and no default")]
    MissingRequired(String),

    #[error("malformed parameter override '{0}': expected KEY=VALUE")]
    MalformedOverride(String),

    #[error("failed to load parameters file: {0}")]
    File(String),
}

/// Required credentials absent from a resolved credential set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("bundle requires credentials that were not provided: {}", .names.join(", "))]
pub struct MissingCredentials {
    /// Missing credential names, sorted.
    pub names: Vec<String>,
}

/// Errors surfaced by the upgrade workflow.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("installation '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(ClaimStoreError),

    #[error("failed to resolve bundle '{reference}': {message}")]
    Resolution { reference: String, message: String },

    #[error(transparent)]
    Merge(#[from] ParameterError),

    #[error("failed to prepare execution: {0}")]
    PrepareExecution(String),

    #[error("failed to resolve credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    MissingCredentials(#[from] MissingCredentials),

    /// The driver failed; `diagnostics` holds its captured error stream.
    #[error("upgrade failed: {}", render_execution(.message, .diagnostics))]
    Execution { message: String, diagnostics: String },

    #[error("failed to persist claim for installation '{installation}': {source}")]
    Persistence {
        installation: String,
        #[source]
        source: ClaimStoreError,
    },
}

fn render_execution(message: &str, diagnostics: &str) -> String {
    let diagnostics = diagnostics.trim_end();
    if diagnostics.is_empty() {
        message.to_string()
    } else {
        format!("{message}\n{diagnostics}")
    }
}
