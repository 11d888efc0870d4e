use crate::keywords::KeywordSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PROCESSING_VERSION: &str = concat!("rfi-search-", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn from_text_rows(name: impl Into<String>, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect()
            })
            .collect();
        Self::new(name, rows)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(|cell| cell.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFile {
    pub basename: String,
    pub sha256: String,
    pub relative_path: Option<String>,
    pub stored_path: Option<PathBuf>,
}

pub fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMatch {
    pub column: usize,
    pub content: String,
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSection<'a> {
    pub sheet: &'a Sheet,
    pub header_row: usize,
    pub requirement: ColumnMatch,
    pub responses: Vec<ColumnMatch>,
}

impl DetectedSection<'_> {
    pub fn sheet_name(&self) -> &str {
        &self.sheet.name
    }

    pub fn response_columns(&self) -> Vec<usize> {
        self.responses.iter().map(|response| response.column).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    SmartBusiness,
    Generic,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::SmartBusiness => "smart_business",
            ChunkKind::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetChunk {
    pub chunk_id: String,
    pub source: String,
    pub sheet_name: String,
    pub start_row: u32,
    pub end_row: u32,
    pub kind: ChunkKind,
    pub requirement: String,
    pub response: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub obsolete: bool,
    pub content_sha256: String,
    pub source: String,
    pub source_basename: String,
    pub source_sha256: String,
    #[serde(default)]
    pub source_relpath: Option<String>,
    pub sheet_name: String,
    pub start_row: u32,
    pub end_row: u32,
    pub chunk_type: ChunkKind,
    pub has_content: bool,
    pub indexed_at: DateTime<Utc>,
    pub processing_version: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, String>,
}

impl IndexRecord {
    pub fn provenance(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("source_basename".to_string(), self.source_basename.clone());
        map.insert("source_sha256".to_string(), self.source_sha256.clone());
        if let Some(relpath) = &self.source_relpath {
            map.insert("source_relpath".to_string(), relpath.clone());
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f64,
    pub record: IndexRecord,
}

impl SearchHit {
    pub fn file_label(&self) -> &str {
        file_stem(&self.record.source)
    }

    pub fn rows_label(&self) -> String {
        format!("{}-{}", self.record.start_row, self.record.end_row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: BulkReport) {
        self.succeeded += other.succeeded;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub exists: bool,
    pub document_count: Option<u64>,
    pub store_size_bytes: Option<u64>,
    pub indexing_total: Option<u64>,
    pub search_total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub requirement_keywords: KeywordSet,
    pub response_keywords: KeywordSet,
    pub header_scan_rows: usize,
    pub min_requirement_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            requirement_keywords: KeywordSet::default_requirement(),
            response_keywords: KeywordSet::default_response(),
            header_scan_rows: 20,
            min_requirement_chars: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub index_name: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub processing_version: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_name: "rfi_rag".to_string(),
            dimensions: crate::DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: 100,
            processing_version: PROCESSING_VERSION.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_record(id: &str, embedding: Vec<f32>) -> IndexRecord {
    IndexRecord {
        chunk_id: id.to_string(),
        content: format!("content of {id}"),
        embedding,
        obsolete: false,
        content_sha256: "c".to_string(),
        source: "f.xlsx".to_string(),
        source_basename: "f.xlsx".to_string(),
        source_sha256: "h".to_string(),
        source_relpath: None,
        sheet_name: "S".to_string(),
        start_row: 2,
        end_row: 2,
        chunk_type: ChunkKind::SmartBusiness,
        has_content: true,
        indexed_at: Utc::now(),
        processing_version: "test".to_string(),
        metadata: BTreeMap::new(),
    }
}
