//! Processing configuration
//!
//! A [`ProcessingConfig`] is built once per run, validated at construction and
//! never mutated while documents are being flattened. It can be assembled with
//! the `with_*` builder methods, taken from one of the presets, or read from a
//! JSON document.

use crate::error::{Error, Result};
use crate::identity::IdentityMode;
use crate::naming::NamingOptions;
use crate::recovery::RecoveryMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How array fields are turned into output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMode {
    /// Scalar arrays stay in the record, anything else becomes a child table
    #[default]
    Smart,
    /// Always extract to a child table
    Separate,
    /// Serialize the whole array into one string field
    Inline,
    /// Drop array fields
    Skip,
}

/// What to emit for null values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// Omit the field
    #[default]
    Skip,
    /// Write an empty string
    Empty,
    /// Write a JSON null
    Null,
}

/// Hint for how the orchestrator trades memory for throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Buffer output until the memory threshold is reached
    #[default]
    Standard,
    /// Flatten the documents of a chunk on worker threads
    HighPerformance,
    /// Hand every chunk to the writer as soon as it is flattened
    LowMemory,
}

/// Configuration for a processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub array_mode: ArrayMode,
    pub null_policy: NullPolicy,

    /// Keep empty strings instead of omitting them
    pub include_empty: bool,

    /// Write numbers and booleans as strings
    pub cast_to_string: bool,

    /// Top-level records flattened per chunk
    pub batch_size: usize,

    /// Estimated buffered bytes after which output is flushed
    pub memory_threshold: usize,

    pub processing_mode: ProcessingMode,
    pub recovery_mode: RecoveryMode,
    pub identity_mode: IdentityMode,

    pub id_field: String,
    pub parent_field: String,
    pub time_field: String,

    pub naming: NamingOptions,

    /// Maximum absolute nesting level before a record is rejected
    pub max_depth: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            array_mode: ArrayMode::default(),
            null_policy: NullPolicy::default(),
            include_empty: false,
            cast_to_string: true,
            batch_size: 1000,
            memory_threshold: 100 * 1024 * 1024,
            processing_mode: ProcessingMode::default(),
            recovery_mode: RecoveryMode::default(),
            identity_mode: IdentityMode::default(),
            id_field: String::from("__transmog_id"),
            parent_field: String::from("__parent_transmog_id"),
            time_field: String::from("__transmog_datetime"),
            naming: NamingOptions::default(),
            max_depth: 100,
        }
    }
}

impl ProcessingConfig {
    /// Small batches flushed as soon as they are ready
    pub fn memory_optimized() -> Self {
        ProcessingConfig {
            batch_size: 100,
            memory_threshold: 16 * 1024 * 1024,
            processing_mode: ProcessingMode::LowMemory,
            ..Self::default()
        }
    }

    /// Large batches flattened in parallel
    pub fn performance_optimized() -> Self {
        ProcessingConfig {
            batch_size: 10_000,
            memory_threshold: 1024 * 1024 * 1024,
            processing_mode: ProcessingMode::HighPerformance,
            ..Self::default()
        }
    }

    /// Short metadata field names
    pub fn simple_mode() -> Self {
        ProcessingConfig {
            id_field: String::from("id"),
            parent_field: String::from("parent_id"),
            time_field: String::from("timestamp"),
            ..Self::default()
        }
    }

    /// Drops failing records with a warning instead of aborting
    pub fn error_tolerant() -> Self {
        ProcessingConfig {
            recovery_mode: RecoveryMode::Warn,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document. Missing fields
    /// take their default values.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ProcessingConfig = serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid configuration: {e}")))?;
        config.validate()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check the settings, returning the config when they are usable
    pub fn validate(self) -> Result<Self> {
        self.naming.validate()?;
        if self.batch_size == 0 {
            return Err(Error::configuration("batch_size must be at least 1"));
        }
        if self.max_depth == 0 {
            return Err(Error::configuration("max_depth must be at least 1"));
        }
        for (name, value) in [
            ("id_field", &self.id_field),
            ("parent_field", &self.parent_field),
            ("time_field", &self.time_field),
        ] {
            if value.is_empty() {
                return Err(Error::configuration(format!("{name} must not be empty")));
            }
        }
        if self.id_field == self.parent_field
            || self.id_field == self.time_field
            || self.parent_field == self.time_field
        {
            return Err(Error::configuration(
                "id_field, parent_field and time_field must be distinct",
            ));
        }
        Ok(self)
    }

    pub fn with_array_mode(mut self, mode: ArrayMode) -> Self {
        self.array_mode = mode;
        self
    }

    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    pub fn with_include_empty(mut self, include: bool) -> Self {
        self.include_empty = include;
        self
    }

    pub fn with_cast_to_string(mut self, cast: bool) -> Self {
        self.cast_to_string = cast;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    pub fn with_identity_mode(mut self, mode: IdentityMode) -> Self {
        self.identity_mode = mode;
        self
    }

    pub fn with_deterministic_ids(self) -> Self {
        self.with_identity_mode(IdentityMode::deterministic())
    }

    pub fn with_field_names(
        mut self,
        id_field: impl Into<String>,
        parent_field: impl Into<String>,
        time_field: impl Into<String>,
    ) -> Self {
        self.id_field = id_field.into();
        self.parent_field = parent_field.into();
        self.time_field = time_field.into();
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.naming.separator = separator.into();
        self
    }

    pub fn with_nested_threshold(mut self, threshold: usize) -> Self {
        self.naming.nested_threshold = threshold;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
