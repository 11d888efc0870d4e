use crate::chunking::{build_chunks, ChunkingConfig};
use crate::detector::SectionDetector;
use crate::extractor::{is_spreadsheet, SheetExtractor};
use crate::keywords::KeywordMatcher;
use crate::models::{
    ColumnMatch, DetectedSection, IndexRecord, IngestionOptions, SheetChunk, SourceFile,
};
use crate::store::{digest_bytes, ContentStore};
use crate::IngestError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_spreadsheets(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        // Office lock files such as `~$RFI.xlsx`.
        let is_lock_file = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("~$"));

        if is_spreadsheet(entry.path()) && !is_lock_file {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentStage {
    Read,
    Store,
    Parse,
    Embed,
    Index,
}

impl fmt::Display for IncidentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IncidentStage::Read => "read",
            IncidentStage::Store => "store",
            IncidentStage::Parse => "parse",
            IncidentStage::Embed => "embed",
            IncidentStage::Index => "index",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct Incident {
    pub path: PathBuf,
    pub stage: IncidentStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub files_seen: usize,
    pub files_processed: usize,
    pub chunks_produced: usize,
    pub chunks_indexed: usize,
    pub incidents: Vec<Incident>,
}

impl IngestionReport {
    pub fn record_incident(
        &mut self,
        path: &Path,
        stage: IncidentStage,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        warn!(path = %path.display(), %stage, reason = %reason, "ingestion incident");
        self.incidents.push(Incident {
            path: path.to_path_buf(),
            stage,
            reason,
        });
    }
}

#[derive(Debug, Clone)]
pub struct SectionSummary {
    pub sheet_name: String,
    pub header_row: usize,
    pub requirement: ColumnMatch,
    pub responses: Vec<ColumnMatch>,
    pub chunk_count: usize,
}

impl SectionSummary {
    pub fn new(section: &DetectedSection<'_>, chunk_count: usize) -> Self {
        Self {
            sheet_name: section.sheet_name().to_string(),
            header_row: section.header_row,
            requirement: section.requirement.clone(),
            responses: section.responses.clone(),
            chunk_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub source: SourceFile,
    pub sections: Vec<SectionSummary>,
    pub records: Vec<IndexRecord>,
    pub store_error: Option<String>,
}

pub struct FilePreparer<'a, E, M> {
    pub store: &'a ContentStore,
    pub extractor: &'a E,
    pub detector: &'a SectionDetector<M>,
    pub options: &'a IngestionOptions,
    pub processing_version: &'a str,
}

impl<E: SheetExtractor, M: KeywordMatcher> FilePreparer<'_, E, M> {
    pub fn prepare_file(&self, path: &Path) -> Result<PreparedFile, IngestError> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        self.prepare_bytes(&bytes, name)
    }

    pub fn prepare_bytes(
        &self,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<PreparedFile, IngestError> {
        let basename = Path::new(original_name)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(original_name.to_string()))?
            .to_string();

        let (source, store_error) = match self.store.store(bytes, &basename) {
            Ok(stored) => (
                SourceFile {
                    basename: basename.clone(),
                    sha256: stored.sha256,
                    relative_path: Some(stored.relative_path),
                    stored_path: Some(stored.stored_path),
                },
                None,
            ),
            Err(error) => (
                SourceFile {
                    basename: basename.clone(),
                    sha256: digest_bytes(bytes),
                    relative_path: None,
                    stored_path: None,
                },
                Some(error.to_string()),
            ),
        };

        let sheets = self.extractor.extract_from_bytes(bytes)?;
        let sections = self.detector.detect(
            &sheets,
            &self.options.requirement_keywords,
            &self.options.response_keywords,
        );

        if sections.is_empty() {
            info!(file = %basename, sheets = sheets.len(), "no requirement/response section found");
        }

        let config = ChunkingConfig::from(self.options);
        let indexed_at = Utc::now();
        let mut summaries = Vec::with_capacity(sections.len());
        let mut records = Vec::new();

        for section in &sections {
            let chunks = build_chunks(section, &basename, config);
            summaries.push(SectionSummary::new(section, chunks.len()));
            records.extend(enrich_chunks(chunks, &source, indexed_at, self.processing_version));
        }

        Ok(PreparedFile {
            source,
            sections: summaries,
            records,
            store_error,
        })
    }
}

pub fn enrich_chunks(
    chunks: Vec<SheetChunk>,
    source: &SourceFile,
    indexed_at: DateTime<Utc>,
    processing_version: &str,
) -> Vec<IndexRecord> {
    chunks
        .into_iter()
        .map(|chunk| IndexRecord {
            content_sha256: digest_bytes(chunk.text.as_bytes()),
            chunk_id: chunk.chunk_id,
            content: chunk.text,
            embedding: Vec::new(),
            obsolete: false,
            source: chunk.source,
            source_basename: source.basename.clone(),
            source_sha256: source.sha256.clone(),
            source_relpath: source.relative_path.clone(),
            sheet_name: chunk.sheet_name,
            start_row: chunk.start_row,
            end_row: chunk.end_row,
            chunk_type: chunk.kind,
            has_content: true,
            indexed_at,
            processing_version: processing_version.to_string(),
            metadata: chunk.metadata,
        })
        .collect()
}
