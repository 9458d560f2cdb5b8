//! # Transmog - nested documents to relational tables
//!
//! Flattens arbitrarily nested JSON documents into one main table plus child
//! tables linked by generated identifiers, ready for row or columnar stores.
//!
//! ## Modules
//!
//! - **naming**: column/table names and path abbreviation
//! - **identity**: deterministic or random row identifiers
//! - **context**: per-document traversal state
//! - **flatten**: the recursive flattening engine
//! - **recovery**: strict/skip/warn handling of bad records
//! - **processor**: batching, streaming and writer orchestration
//!
//! ## Quick Start
//!
//! ```rust
//! use transmog::{ProcessingConfig, Processor};
//! use serde_json::json;
//!
//! # fn main() -> transmog::Result<()> {
//! let data = json!({
//!     "id": 1,
//!     "name": "Alice",
//!     "profile": {"city": "Oslo"},
//!     "posts": [
//!         {"id": 10, "title": "First Post"},
//!         {"id": 11, "title": "Second Post"}
//!     ]
//! });
//!
//! let processor = Processor::new(ProcessingConfig::default())?;
//! let result = processor.process(data, "users")?;
//!
//! // users: id, name, profile_city
//! // users_posts: id, title, linked through __parent_transmog_id
//! assert_eq!(result.main_table().len(), 1);
//! assert_eq!(result.child_table("users_posts").unwrap().len(), 2);
//! # Ok(())
//! # }
//! ```

use std::io::BufRead;

pub mod config;
pub mod context;
pub mod error;
pub mod flatten;
pub mod identity;
pub mod input;
pub mod logging;
pub mod naming;
pub mod processor;
pub mod recovery;
pub mod types;
pub mod writer;

// Re-export commonly used types for convenience
pub use config::{ArrayMode, NullPolicy, ProcessingConfig, ProcessingMode};
pub use context::ProcessingContext;
pub use error::{Error, Result};
pub use flatten::Flattener;
pub use identity::{IdGenerator, IdentityMode};
pub use input::RecordSource;
pub use naming::{AbbreviationCache, NamingOptions};
pub use processor::{ProcessingResult, Processor};
pub use recovery::{ProcessingReport, RecordFailure, RecoveryMode};
pub use types::{FlatRecord, Table, TableSet};
pub use writer::{JsonLinesWriter, MemoryWriter, StreamWriter, TableWriter};

/// Flatten a newline-delimited JSON stream into `writer`
pub fn flatten_json_lines<R, W>(
    reader: R,
    entity_name: &str,
    config: ProcessingConfig,
    writer: &mut W,
) -> Result<ProcessingReport>
where
    R: BufRead,
    W: TableWriter + ?Sized,
{
    let processor = Processor::new(config)?;
    processor.process_to_writer(RecordSource::Reader(Box::new(reader)), entity_name, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_flatten_json_lines() {
        let input = "{\"id\": 1, \"posts\": [{\"id\": 10}]}\n{\"id\": 2, \"posts\": []}\n";
        let mut writer = MemoryWriter::new("users");

        let report =
            flatten_json_lines(Cursor::new(input), "users", ProcessingConfig::default(), &mut writer)
                .unwrap();

        assert_eq!(report.processed, 2);
        assert!(writer.is_finalized());
        assert_eq!(writer.tables().main.len(), 2);
        assert_eq!(writer.tables().child("users_posts").unwrap().len(), 1);
    }
}
