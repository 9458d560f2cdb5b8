//! Fault tolerance around per-document flattening.
//!
//! The policy wraps the flatten call of one top-level document. A failure
//! anywhere inside the document fails the whole document, so child tables
//! never reference a partially written parent.

use crate::error::{Error, Result};
use crate::naming::AbbreviationCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What to do when a record cannot be flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Abort the run with the error
    #[default]
    Strict,
    /// Drop the record and keep going
    Skip,
    /// Drop the record, emit a warning and keep going
    Warn,
}

/// A record dropped by the recovery policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record_index: usize,
    pub path: String,
    pub message: String,
}

/// Outcome counters for a processing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// Top-level records flattened into the main table
    pub processed: usize,

    /// Records dropped by the recovery policy
    pub failures: Vec<RecordFailure>,

    /// Abbreviated names generated during the run
    #[serde(default, skip_serializing_if = "AbbreviationCache::is_empty")]
    pub abbreviations: AbbreviationCache,
}

impl ProcessingReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn merge(&mut self, other: ProcessingReport) {
        self.processed += other.processed;
        self.failures.extend(other.failures);
        self.abbreviations.merge(other.abbreviations);
    }
}

/// Applies a [`RecoveryMode`] to per-record results
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    mode: RecoveryMode,
}

impl RecoveryPolicy {
    pub fn new(mode: RecoveryMode) -> Self {
        RecoveryPolicy { mode }
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }

    /// Resolve the result of flattening record `index`.
    ///
    /// Returns `Ok(None)` for a dropped record. Configuration and writer
    /// errors are never recovered.
    pub fn apply<T>(
        &self,
        index: usize,
        result: Result<T>,
        report: &mut ProcessingReport,
    ) -> Result<Option<T>> {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err.at_record(index),
        };

        let failure = match err {
            Error::Validation { path, message, .. } if self.mode != RecoveryMode::Strict => {
                RecordFailure {
                    record_index: index,
                    path,
                    message,
                }
            }
            other => return Err(other),
        };

        if self.mode == RecoveryMode::Warn {
            warn!(record = index, path = %failure.path, "dropping record: {}", failure.message);
        } else {
            debug!(record = index, path = %failure.path, "skipping record: {}", failure.message);
        }
        report.failures.push(failure);
        Ok(None)
    }
}
