//! Input normalization
//!
//! Every supported delivery mode is turned into one iterator of object
//! records. Shape problems (null input, non-object records) are configuration
//! errors; a line that cannot be decoded is a per-record validation error and
//! goes through the recovery policy like any other bad record.

use crate::error::{Error, Result};
use crate::flatten::value_kind;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Normalized stream of top-level records
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Value>> + 'a>;

/// Where the records of a run come from
pub enum RecordSource<'a> {
    /// One record. An array is treated as a sequence of records
    Record(Value),
    /// A finite sequence, shape-checked before anything is flattened
    Records(Vec<Value>),
    /// A lazily produced sequence, consumed once
    Iter(Box<dyn Iterator<Item = Value> + 'a>),
    /// JSON text holding one record or an array of records
    Json(String),
    /// Newline-delimited JSON text, one record per line
    JsonLines(String),
    /// A reader yielding newline-delimited JSON
    Reader(Box<dyn BufRead + 'a>),
    /// A file; `.jsonl` and `.ndjson` are read line by line
    File(PathBuf),
}

impl std::fmt::Debug for RecordSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordSource::Record(_) => f.write_str("Record"),
            RecordSource::Records(records) => write!(f, "Records({})", records.len()),
            RecordSource::Iter(_) => f.write_str("Iter"),
            RecordSource::Json(text) => write!(f, "Json({} bytes)", text.len()),
            RecordSource::JsonLines(text) => write!(f, "JsonLines({} bytes)", text.len()),
            RecordSource::Reader(_) => f.write_str("Reader"),
            RecordSource::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

impl From<Value> for RecordSource<'_> {
    fn from(value: Value) -> Self {
        RecordSource::Record(value)
    }
}

impl From<Vec<Value>> for RecordSource<'_> {
    fn from(values: Vec<Value>) -> Self {
        RecordSource::Records(values)
    }
}

impl From<PathBuf> for RecordSource<'_> {
    fn from(path: PathBuf) -> Self {
        RecordSource::File(path)
    }
}

impl From<&Path> for RecordSource<'_> {
    fn from(path: &Path) -> Self {
        RecordSource::File(path.to_path_buf())
    }
}

impl<'a> RecordSource<'a> {
    pub fn iter<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'a,
    {
        RecordSource::Iter(Box::new(records.into_iter()))
    }

    /// Turn the source into a stream of object records.
    ///
    /// Eagerly available input is fully shape-checked here, so a bad
    /// record fails the run before any output exists.
    pub fn into_records(self) -> Result<RecordIter<'a>> {
        match self {
            RecordSource::Record(Value::Array(items)) | RecordSource::Records(items) => {
                check_records(&items)?;
                Ok(Box::new(items.into_iter().map(Ok)))
            }
            RecordSource::Record(value) => {
                check_record(0, &value)?;
                Ok(Box::new(std::iter::once(Ok(value))))
            }
            RecordSource::Iter(values) => Ok(Box::new(values.enumerate().map(|(i, value)| {
                check_record(i, &value)?;
                Ok(value)
            }))),
            RecordSource::Json(text) => {
                let value = decode_json(text.as_bytes())?;
                RecordSource::Record(value).into_records()
            }
            RecordSource::JsonLines(text) => Ok(json_lines(Cursor::new(text.into_bytes()))),
            RecordSource::Reader(reader) => Ok(json_lines(reader)),
            RecordSource::File(path) => open_file(&path),
        }
    }
}

fn check_record(index: usize, value: &Value) -> Result<()> {
    match value {
        Value::Object(_) => Ok(()),
        Value::Null if index == 0 => Err(Error::configuration("input is null")),
        other => Err(Error::configuration(format!(
            "record {index} is {}, expected an object",
            value_kind(other)
        ))),
    }
}

fn check_records(values: &[Value]) -> Result<()> {
    values
        .iter()
        .enumerate()
        .try_for_each(|(i, value)| check_record(i, value))
}

/// Decode a whole JSON document, using SIMD parsing when it succeeds.
///
/// SIMD parsing rewrites its buffer in place, so it runs on a scratch copy
/// that is released before the fallback parses `bytes`.
pub fn decode_json(bytes: &[u8]) -> Result<Value> {
    let simd = {
        let mut scratch = bytes.to_vec();
        simd_json::serde::from_slice::<Value>(&mut scratch)
    };
    match simd {
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_json::from_slice(bytes)?),
    }
}

/// Lazily decode newline-delimited JSON. Blank lines are ignored
fn json_lines<'a, R: BufRead + 'a>(reader: R) -> RecordIter<'a> {
    let mut index = 0;
    Box::new(reader.lines().enumerate().filter_map(move |(line_no, line)| {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                return Some(Err(Error::validation(
                    "",
                    format!("line {}: failed to read: {err}", line_no + 1),
                )))
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let position = index;
        index += 1;
        Some(
            serde_json::from_str::<Value>(trimmed)
                .map_err(|err| Error::validation("", format!("line {}: {err}", line_no + 1)))
                .and_then(|value| {
                    check_record(position, &value)?;
                    Ok(value)
                }),
        )
    }))
}

fn open_file<'a>(path: &Path) -> Result<RecordIter<'a>> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;

    let line_delimited = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("jsonl" | "ndjson")
    );
    if line_delimited {
        return Ok(json_lines(BufReader::new(file)));
    }

    let mut content = Vec::new();
    BufReader::new(file).read_to_end(&mut content).map_err(io_err)?;
    match decode_json(&content) {
        Ok(value) => RecordSource::Record(value).into_records(),
        Err(err) => {
            debug!(path = %path.display(), "not a single JSON document ({err}), reading as JSON lines");
            Ok(json_lines(Cursor::new(content)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn collect(source: RecordSource<'_>) -> Vec<Result<Value>> {
        source.into_records().unwrap().collect()
    }

    #[test]
    fn test_single_record_and_array() {
        assert_eq!(collect(json!({"a": 1}).into()).len(), 1);
        assert_eq!(collect(json!([{"a": 1}, {"a": 2}]).into()).len(), 2);
    }

    #[test]
    fn test_null_and_non_objects_rejected() {
        for source in [
            RecordSource::Record(Value::Null),
            RecordSource::Record(json!(5)),
            RecordSource::Records(vec![json!({"a": 1}), json!("x")]),
            RecordSource::Json("null".to_string()),
            RecordSource::Json(r#"[{"a": 1}, [1, 2]]"#.to_string()),
        ] {
            let err = source.into_records().err().unwrap();
            assert!(err.is_configuration(), "{err}");
        }
    }

    #[test]
    fn test_iter_checks_shape_lazily() {
        let source = RecordSource::iter(vec![json!({"a": 1}), json!(null)]);
        let items: Vec<_> = source.into_records().unwrap().collect();
        assert!(items[0].is_ok());
        assert!(items[1].as_ref().unwrap_err().is_configuration());
    }

    #[test]
    fn test_json_text() {
        let items = collect(RecordSource::Json(r#"[{"a": 1}, {"b": 2}]"#.to_string()));
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap()["b"], 2);

        let err = RecordSource::Json("{not json".to_string())
            .into_records()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_json_lines_with_bad_line() {
        let text = "{\"a\": 1}\n\n{broken\n{\"a\": 3}\n";
        let items = collect(RecordSource::JsonLines(text.to_string()));

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("line 3"));
        assert_eq!(items[2].as_ref().unwrap()["a"], 3);
    }

    #[test]
    fn test_json_lines_non_object_is_configuration_error() {
        let items = collect(RecordSource::JsonLines("{\"a\": 1}\n[1]\n".to_string()));
        assert!(items[1].as_ref().unwrap_err().is_configuration());
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(decode_json(br#"{"a": [1, 2]}"#).unwrap(), json!({"a": [1, 2]}));
        assert!(decode_json(b"{\"a\": 1}\n{\"a\": 2}\n").is_err());
    }

    #[test]
    fn test_files() {
        let dir = tempfile::tempdir().unwrap();

        let array_path = dir.path().join("records.json");
        std::fs::write(&array_path, r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(collect(array_path.into()).len(), 2);

        let lines_path = dir.path().join("records.jsonl");
        let mut file = File::create(&lines_path).unwrap();
        writeln!(file, "{{\"a\": 1}}").unwrap();
        writeln!(file, "{{\"a\": 2}}").unwrap();
        writeln!(file, "{{\"a\": 3}}").unwrap();
        drop(file);
        assert_eq!(collect(lines_path.into()).len(), 3);

        let disguised = dir.path().join("stream.json");
        std::fs::write(&disguised, "{\"a\": 1}\n{\"a\": 2}\n").unwrap();
        assert_eq!(collect(disguised.into()).len(), 2);

        let missing = RecordSource::File(dir.path().join("missing.json"))
            .into_records()
            .err()
            .unwrap();
        assert!(matches!(missing, Error::Io { .. }));
    }
}
