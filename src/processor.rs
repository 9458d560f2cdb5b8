//! Batch and streaming orchestration
//!
//! The [`Processor`] pulls normalized records from a [`RecordSource`], cuts
//! them into chunks of `batch_size`, flattens each document under the
//! recovery policy and forwards the resulting tables to a [`TableWriter`].
//! Buffered output is flushed per chunk in low-memory mode, or whenever its
//! estimated size passes the memory threshold.

use crate::config::{ProcessingConfig, ProcessingMode};
use crate::context::ProcessingContext;
use crate::error::Result;
use crate::flatten::Flattener;
use crate::input::RecordSource;
use crate::naming::AbbreviationCache;
use crate::recovery::{ProcessingReport, RecoveryPolicy};
use crate::types::{Table, TableSet};
use crate::writer::{MemoryWriter, TableWriter, WriterGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use tracing::{debug, info};

/// Everything produced by an in-memory run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub tables: TableSet,
    pub report: ProcessingReport,
}

impl ProcessingResult {
    pub fn main_table(&self) -> &Table {
        &self.tables.main
    }

    pub fn child_table(&self, name: &str) -> Option<&Table> {
        self.tables.child(name)
    }

    /// Names of all tables, main first
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.tables().map(|t| t.name.as_str()).collect()
    }

    pub fn all_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.tables()
    }

    pub fn record_counts(&self) -> BTreeMap<String, usize> {
        self.tables
            .tables()
            .map(|t| (t.name.clone(), t.len()))
            .collect()
    }

    pub fn abbreviations(&self) -> &AbbreviationCache {
        &self.tables.abbreviations
    }
}

/// Drives flattening runs
#[derive(Debug, Clone)]
pub struct Processor {
    flattener: Flattener,
    policy: RecoveryPolicy,
}

impl Processor {
    /// Create a processor. Invalid configuration is rejected here, before
    /// any input is read.
    pub fn new(config: ProcessingConfig) -> Result<Self> {
        let policy = RecoveryPolicy::new(config.recovery_mode);
        Ok(Processor {
            flattener: Flattener::new(config)?,
            policy,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        self.flattener.config()
    }

    /// Flatten a single document as record 0 of its own run
    pub fn flatten(&self, document: &Value, entity_name: &str) -> Result<TableSet> {
        self.flattener
            .flatten(document, entity_name, &ProcessingContext::new(0))
    }

    /// Process every record of `source` and keep all tables in memory
    pub fn process<'a>(
        &self,
        source: impl Into<RecordSource<'a>>,
        entity_name: &str,
    ) -> Result<ProcessingResult> {
        let mut writer = MemoryWriter::new(entity_name);
        let report = self.process_to_writer(source, entity_name, &mut writer)?;
        let mut tables = writer.into_tables();
        tables.abbreviations = report.abbreviations.clone();
        Ok(ProcessingResult { tables, report })
    }

    /// Process every record of `source`, streaming batches into `writer`.
    ///
    /// The writer is finalized exactly once whether the run succeeds or not.
    /// Batches already written before a failure stay written.
    pub fn process_to_writer<'a, W: TableWriter + ?Sized>(
        &self,
        source: impl Into<RecordSource<'a>>,
        entity_name: &str,
        writer: &mut W,
    ) -> Result<ProcessingReport> {
        let mut guard = WriterGuard::new(writer);
        let report = self.run(source.into(), entity_name, &mut guard)?;
        guard.finish()?;
        Ok(report)
    }

    fn run<W: TableWriter + ?Sized>(
        &self,
        source: RecordSource<'_>,
        entity_name: &str,
        writer: &mut WriterGuard<'_, W>,
    ) -> Result<ProcessingReport> {
        let batch_size = self.config().batch_size;
        debug!(?source, entity = entity_name, batch_size, "starting run");

        let records = source.into_records()?;
        let mut report = ProcessingReport::default();
        let mut buffer = TableSet::new(entity_name);
        let mut chunk: Vec<(usize, Value)> = Vec::with_capacity(batch_size);

        for (index, item) in records.enumerate() {
            match item {
                Ok(document) => chunk.push((index, document)),
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    self.policy.apply::<()>(index, Err(err), &mut report)?;
                }
            }

            if chunk.len() >= batch_size {
                self.process_chunk(std::mem::take(&mut chunk), entity_name, &mut buffer, &mut report)?;
                self.maybe_flush(&mut buffer, &mut report, writer)?;
            }
        }

        if !chunk.is_empty() {
            self.process_chunk(chunk, entity_name, &mut buffer, &mut report)?;
        }
        self.flush(&mut buffer, &mut report, writer)?;

        info!(
            entity = entity_name,
            processed = report.processed,
            failed = report.failed(),
            "run complete"
        );
        Ok(report)
    }

    fn process_chunk(
        &self,
        chunk: Vec<(usize, Value)>,
        entity_name: &str,
        buffer: &mut TableSet,
        report: &mut ProcessingReport,
    ) -> Result<()> {
        debug!(records = chunk.len(), "flattening chunk");

        let results: Vec<(usize, Result<TableSet>)> = match self.config().processing_mode {
            ProcessingMode::HighPerformance if chunk.len() > 1 => {
                self.flatten_parallel(&chunk, entity_name)
            }
            _ => chunk
                .iter()
                .map(|(index, document)| (*index, self.flatten_at(document, entity_name, *index)))
                .collect(),
        };

        for (index, result) in results {
            if let Some(tables) = self.policy.apply(index, result, report)? {
                report.processed += tables.main.len();
                buffer.append(tables);
            }
        }
        Ok(())
    }

    fn flatten_at(&self, document: &Value, entity_name: &str, index: usize) -> Result<TableSet> {
        self.flattener
            .flatten(document, entity_name, &ProcessingContext::new(index))
    }

    /// Flatten a chunk on scoped worker threads. Each worker owns its own
    /// contexts and accumulators; results come back in input order.
    fn flatten_parallel(
        &self,
        chunk: &[(usize, Value)],
        entity_name: &str,
    ) -> Vec<(usize, Result<TableSet>)> {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(chunk.len());
        let per_worker = chunk.len().div_ceil(workers);

        std::thread::scope(|s| {
            let handles: Vec<_> = chunk
                .chunks(per_worker)
                .map(|part| {
                    s.spawn(move || {
                        part.iter()
                            .map(|(index, document)| {
                                (*index, self.flatten_at(document, entity_name, *index))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    fn maybe_flush<W: TableWriter + ?Sized>(
        &self,
        buffer: &mut TableSet,
        report: &mut ProcessingReport,
        writer: &mut WriterGuard<'_, W>,
    ) -> Result<()> {
        let config = self.config();
        if config.processing_mode == ProcessingMode::LowMemory
            || buffer.estimated_size() >= config.memory_threshold
        {
            self.flush(buffer, report, writer)?;
        }
        Ok(())
    }

    fn flush<W: TableWriter + ?Sized>(
        &self,
        buffer: &mut TableSet,
        report: &mut ProcessingReport,
        writer: &mut WriterGuard<'_, W>,
    ) -> Result<()> {
        if buffer.is_empty() && buffer.abbreviations.is_empty() {
            return Ok(());
        }
        let mut tables = buffer.take();
        debug!(records = tables.total_records(), "flushing tables to writer");
        report
            .abbreviations
            .merge(std::mem::take(&mut tables.abbreviations));
        writer.write_tables(tables)
    }
}
