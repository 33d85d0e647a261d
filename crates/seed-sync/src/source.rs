//! # Record Sources
//!
//! Where a run's records come from.
//!
//! ## Formats
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  colors.json               [ {"id": 1, "name": "red"}, ... ]           │
//! │  colors.jsonl / .ndjson    {"id": 1, "name": "red"}                    │
//! │                            {"id": 2, "name": "blue"}                   │
//! │  MemorySource              Vec<serde_json::Value> built in code        │
//! │                                                                         │
//! │  SourceData.raw  ─► table digest (exact bytes)                         │
//! │  SourceData.records ─► reconciliation                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A filter drops records after parsing; the table digest still covers the
//! whole input.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use seed_core::{table_digest, Digest, SourceRecord};

use crate::error::{SyncError, SyncResult};

/// Predicate deciding which records take part in a run.
pub type RecordFilter = Arc<dyn Fn(&SourceRecord) -> bool + Send + Sync>;

/// What a source hands to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceData {
    /// Exact input bytes, hashed into the table digest.
    pub raw: Vec<u8>,
    /// Parsed records, in source order.
    pub records: Vec<SourceRecord>,
}

impl SourceData {
    /// Digest of the raw input.
    pub fn table_digest(&self) -> Digest {
        table_digest(&self.raw)
    }
}

/// A provider of records for one table.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Human-readable description for logs and errors.
    fn describe(&self) -> String;

    /// Reads all records.
    async fn load(&self) -> SyncResult<SourceData>;
}

// =============================================================================
// File Source
// =============================================================================

/// Layout of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// A JSON array of objects.
    Json,
    /// One JSON object per line.
    JsonLines,
}

impl SourceFormat {
    /// Infers the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(SourceFormat::Json),
            "jsonl" | "ndjson" => Some(SourceFormat::JsonLines),
            _ => None,
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SourceFormat::Json),
            "jsonl" | "ndjson" | "json-lines" => Ok(SourceFormat::JsonLines),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown source format: '{}'. Valid options: json, jsonl",
                other
            ))),
        }
    }
}

/// Reads records from a `.json` or `.jsonl` file.
#[derive(Clone)]
pub struct FileSource {
    path: PathBuf,
    format: Option<SourceFormat>,
    filter: Option<RecordFilter>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            format: None,
            filter: None,
        }
    }

    /// Overrides the format inferred from the extension.
    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Keeps only records for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&SourceRecord) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> SyncResult<SourceFormat> {
        self.format
            .or_else(|| SourceFormat::from_path(&self.path))
            .ok_or_else(|| SyncError::InvalidSource {
                source_name: self.describe(),
                message: "cannot infer format from extension; use .json or .jsonl".into(),
            })
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[async_trait]
impl RecordSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> SyncResult<SourceData> {
        let format = self.format()?;

        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SyncError::SourceReadFailed {
                source_name: self.describe(),
                message: e.to_string(),
            })?;

        let values = match format {
            SourceFormat::Json => parse_json_array(&raw),
            SourceFormat::JsonLines => parse_json_lines(&raw),
        }
        .map_err(|message| SyncError::InvalidSource {
            source_name: self.describe(),
            message,
        })?;

        let records = build_records(values, self.filter.as_ref())?;

        debug!(source = %self.describe(), records = records.len(), "Source loaded");
        Ok(SourceData { raw, records })
    }
}

// =============================================================================
// Memory Source
// =============================================================================

/// Records held in memory. The raw bytes are the JSON encoding of the list.
#[derive(Clone)]
pub struct MemorySource {
    values: Vec<Value>,
    filter: Option<RecordFilter>,
}

impl MemorySource {
    pub fn new(values: Vec<Value>) -> Self {
        MemorySource {
            values,
            filter: None,
        }
    }

    /// Keeps only records for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&SourceRecord) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("values", &self.values.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory ({} values)", self.values.len())
    }

    async fn load(&self) -> SyncResult<SourceData> {
        let raw = serde_json::to_vec(&self.values)?;
        let records = build_records(self.values.clone(), self.filter.as_ref())?;
        Ok(SourceData { raw, records })
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn parse_json_array(raw: &[u8]) -> Result<Vec<Value>, String> {
    match serde_json::from_slice::<Value>(raw).map_err(|e| e.to_string())? {
        Value::Array(values) => Ok(values),
        _ => Err("expected a JSON array of objects".to_string()),
    }
}

fn parse_json_lines(raw: &[u8]) -> Result<Vec<Value>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}

fn build_records(values: Vec<Value>, filter: Option<&RecordFilter>) -> SyncResult<Vec<SourceRecord>> {
    let mut records = Vec::with_capacity(values.len());
    for (position, value) in values.into_iter().enumerate() {
        let record = SourceRecord::from_value(position, value)?;
        if filter.map_or(true, |keep| (**keep)(&record)) {
            records.push(record);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a/colors.json")), Some(SourceFormat::Json));
        assert_eq!(SourceFormat::from_path(Path::new("colors.JSONL")), Some(SourceFormat::JsonLines));
        assert_eq!(SourceFormat::from_path(Path::new("colors.ndjson")), Some(SourceFormat::JsonLines));
        assert_eq!(SourceFormat::from_path(Path::new("colors.csv")), None);
        assert_eq!("jsonl".parse::<SourceFormat>().unwrap(), SourceFormat::JsonLines);
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let body = br#"[{"id": 1, "name": "red"}, {"id": "2", "name": "blue"}]"#;
        file.write_all(body).unwrap();

        let data = FileSource::new(file.path()).load().await.unwrap();
        assert_eq!(data.raw, body.to_vec());
        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[1].id(), 2);
        assert_eq!(data.table_digest(), table_digest(body));
    }

    #[tokio::test]
    async fn test_json_lines_with_filter() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"id": 1, "kind": "a"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": 2, "kind": "b"}}"#).unwrap();

        let source = FileSource::new(file.path())
            .with_filter(|r| r.get("kind") == Some(&json!("b")));
        let data = source.load().await.unwrap();

        let ids: Vec<_> = data.records.iter().map(SourceRecord::id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_source_errors() {
        let missing = FileSource::new("/definitely/not/here.json").load().await;
        assert!(matches!(missing, Err(SyncError::SourceReadFailed { .. })));

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"id": 1}"#).unwrap();
        let not_array = FileSource::new(file.path()).load().await;
        assert!(matches!(not_array, Err(SyncError::InvalidSource { .. })));

        let no_id = MemorySource::new(vec![json!({"name": "x"})]).load().await;
        assert!(matches!(no_id, Err(SyncError::Core(_))));
    }

    #[tokio::test]
    async fn test_memory_source_digest_is_stable() {
        let a = MemorySource::new(vec![json!({"id": 1})]).load().await.unwrap();
        let b = MemorySource::new(vec![json!({"id": 1})]).load().await.unwrap();
        let c = MemorySource::new(vec![json!({"id": 2})]).load().await.unwrap();

        assert_eq!(a.table_digest(), b.table_digest());
        assert_ne!(a.table_digest(), c.table_digest());
    }
}
