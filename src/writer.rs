//! Writer boundary
//!
//! The core hands finished batches of named tables to a [`TableWriter`] and
//! knows nothing about how they are encoded. [`WriterGuard`] makes sure
//! `finalize` runs exactly once, also when a run fails half way.

use crate::error::{Error, Result};
use crate::types::{FlatRecord, TableSet};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key added to every record by [`StreamWriter`] to name its table
pub const TABLE_KEY: &str = "__table";

/// Receives output batches from the processor
pub trait TableWriter {
    fn write_main_batch(&mut self, records: Vec<FlatRecord>) -> Result<()>;

    fn write_child_batch(&mut self, table_name: &str, records: Vec<FlatRecord>) -> Result<()>;

    /// Flush and close. Calling it again is a no-op
    fn finalize(&mut self) -> Result<()>;
}

/// Finalizes the wrapped writer exactly once, on success or failure
pub struct WriterGuard<'w, W: TableWriter + ?Sized> {
    writer: &'w mut W,
    finalized: bool,
}

impl<'w, W: TableWriter + ?Sized> WriterGuard<'w, W> {
    pub fn new(writer: &'w mut W) -> Self {
        WriterGuard {
            writer,
            finalized: false,
        }
    }

    /// Write a buffered table set, main table first
    pub fn write_tables(&mut self, tables: TableSet) -> Result<()> {
        if !tables.main.is_empty() {
            self.writer.write_main_batch(tables.main.records)?;
        }
        for (name, table) in tables.children {
            if !table.is_empty() {
                self.writer.write_child_batch(&name, table.records)?;
            }
        }
        Ok(())
    }

    /// Finalize the writer and report its outcome
    pub fn finish(mut self) -> Result<()> {
        self.finalized = true;
        self.writer.finalize()
    }
}

impl<W: TableWriter + ?Sized> Drop for WriterGuard<'_, W> {
    fn drop(&mut self) {
        if !self.finalized {
            self.finalized = true;
            if let Err(err) = self.writer.finalize() {
                warn!("failed to finalize writer after an aborted run: {err}");
            }
        }
    }
}

/// Collects all batches in memory
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: TableSet,
    finalized: bool,
}

impl MemoryWriter {
    pub fn new(main_table: impl Into<String>) -> Self {
        MemoryWriter {
            tables: TableSet::new(main_table),
            finalized: false,
        }
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn into_tables(self) -> TableSet {
        self.tables
    }
}

impl TableWriter for MemoryWriter {
    fn write_main_batch(&mut self, records: Vec<FlatRecord>) -> Result<()> {
        self.tables.main.records.extend(records);
        Ok(())
    }

    fn write_child_batch(&mut self, table_name: &str, records: Vec<FlatRecord>) -> Result<()> {
        self.tables.child_mut(table_name).records.extend(records);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finalized = true;
        Ok(())
    }
}

/// Writes one `<table>.jsonl` file per table into a directory
pub struct JsonLinesWriter {
    output_dir: PathBuf,
    main_table: String,
    writers: HashMap<String, BufWriter<File>>,
    finalized: bool,
}

impl JsonLinesWriter {
    /// Create the output directory and a writer for it
    pub fn create(output_dir: impl AsRef<Path>, main_table: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).map_err(|source| Error::Io {
            path: output_dir.clone(),
            source,
        })?;

        Ok(JsonLinesWriter {
            output_dir,
            main_table: main_table.into(),
            writers: HashMap::new(),
            finalized: false,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write_records(&mut self, table: &str, records: Vec<FlatRecord>) -> Result<()> {
        if self.finalized {
            return Err(Error::writer(format!("writer already finalized, cannot write '{table}'")));
        }

        if !self.writers.contains_key(table) {
            let path = self.output_dir.join(format!("{table}.jsonl"));
            debug!(path = %path.display(), "opening table file");
            let file = File::create(&path).map_err(Error::writer)?;
            self.writers.insert(table.to_string(), BufWriter::new(file));
        }

        let Some(writer) = self.writers.get_mut(table) else {
            return Ok(());
        };
        for record in records {
            serde_json::to_writer(&mut *writer, &record).map_err(Error::writer)?;
            writer.write_all(b"\n").map_err(Error::writer)?;
        }
        Ok(())
    }
}

impl TableWriter for JsonLinesWriter {
    fn write_main_batch(&mut self, records: Vec<FlatRecord>) -> Result<()> {
        let table = self.main_table.clone();
        self.write_records(&table, records)
    }

    fn write_child_batch(&mut self, table_name: &str, records: Vec<FlatRecord>) -> Result<()> {
        self.write_records(table_name, records)
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        for (_, mut writer) in self.writers.drain() {
            writer.flush().map_err(Error::writer)?;
        }
        Ok(())
    }
}

/// Writes every table into one newline-delimited stream, tagging each
/// record with its table name
pub struct StreamWriter<W: Write> {
    writer: W,
    main_table: String,
    finalized: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W, main_table: impl Into<String>) -> Self {
        StreamWriter {
            writer,
            main_table: main_table.into(),
            finalized: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_records(&mut self, table: &str, records: Vec<FlatRecord>) -> Result<()> {
        for mut record in records {
            record.insert(TABLE_KEY.to_string(), Value::String(table.to_string()));
            serde_json::to_writer(&mut self.writer, &record).map_err(Error::writer)?;
            self.writer.write_all(b"\n").map_err(Error::writer)?;
        }
        Ok(())
    }
}

impl<W: Write> TableWriter for StreamWriter<W> {
    fn write_main_batch(&mut self, records: Vec<FlatRecord>) -> Result<()> {
        let table = self.main_table.clone();
        self.write_records(&table, records)
    }

    fn write_child_batch(&mut self, table_name: &str, records: Vec<FlatRecord>) -> Result<()> {
        self.write_records(table_name, records)
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.writer.flush().map_err(Error::writer)
    }
}
