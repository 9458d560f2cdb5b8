//! Error types for flattening runs.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while configuring or running a flattening job
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings, or input whose top-level shape cannot yield records.
    /// Never recovered internally.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A record failed value-level processing. Subject to the recovery policy
    #[error("validation error{}{}: {message}", fmt_index(.record_index), fmt_path(.path))]
    Validation {
        record_index: Option<usize>,
        path: String,
        message: String,
    },

    /// Surfaced verbatim from a table writer
    #[error("writer error: {0}")]
    Writer(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to read an input file
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input text is not valid JSON
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" in record {i}")).unwrap_or_default()
}

fn fmt_path(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at '{path}'")
    }
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            record_index: None,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn writer<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Writer(err.into())
    }

    /// Attach the position of the top-level record to a validation error
    pub fn at_record(self, index: usize) -> Self {
        match self {
            Error::Validation { path, message, .. } => Error::Validation {
                record_index: Some(index),
                path,
                message,
            },
            other => other,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }
}

/// Result type for flattening operations
pub type Result<T> = std::result::Result<T, Error>;
