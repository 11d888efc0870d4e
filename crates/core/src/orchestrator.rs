use crate::chunking::{build_chunks, ChunkingConfig};
use crate::detector::SectionDetector;
use crate::embeddings::Embedder;
use crate::extractor::{CalamineExtractor, SheetExtractor};
use crate::indexer::IndexManager;
use crate::ingest::{
    discover_spreadsheets, FilePreparer, IncidentStage, IngestionReport, PreparedFile,
    SectionSummary,
};
use crate::keywords::SubstringMatcher;
use crate::models::{IngestionOptions, SearchHit, SearchQuery};
use crate::obsolescence::ChunkStatus;
use crate::store::ContentStore;
use crate::traits::SearchBackend;
use crate::{IngestError, SearchError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct IngestCoordinator<B, E, X = CalamineExtractor> {
    index: IndexManager<B>,
    embedder: E,
    store: ContentStore,
    options: IngestionOptions,
    detector: SectionDetector<SubstringMatcher>,
    extractor: X,
}

impl<B, E> IngestCoordinator<B, E>
where
    B: SearchBackend,
    E: Embedder,
{
    pub fn new(
        index: IndexManager<B>,
        embedder: E,
        store: ContentStore,
        options: IngestionOptions,
    ) -> Self {
        let detector = SectionDetector::new(SubstringMatcher, options.header_scan_rows);
        Self {
            index,
            embedder,
            store,
            options,
            detector,
            extractor: CalamineExtractor,
        }
    }
}

impl<B, E, X> IngestCoordinator<B, E, X>
where
    B: SearchBackend,
    E: Embedder,
    X: SheetExtractor,
{
    pub fn with_extractor<Y: SheetExtractor>(self, extractor: Y) -> IngestCoordinator<B, E, Y> {
        IngestCoordinator {
            index: self.index,
            embedder: self.embedder,
            store: self.store,
            options: self.options,
            detector: self.detector,
            extractor,
        }
    }

    pub fn index(&self) -> &IndexManager<B> {
        &self.index
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub async fn prepare_index(&self, drop_existing: bool) -> Result<(), IngestError> {
        let expected = self.index.settings().dimensions;
        if self.embedder.dimensions() != expected {
            return Err(IngestError::InvalidArgument(format!(
                "embedder produces {} dimensions, index expects {expected}",
                self.embedder.dimensions()
            )));
        }

        if drop_existing {
            self.index.recreate().await?;
        } else {
            self.index.ensure_schema().await?;
        }
        Ok(())
    }

    pub async fn ingest_folder(
        &self,
        folder: &Path,
        drop_existing: bool,
    ) -> Result<IngestionReport, IngestError> {
        if !folder.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "{} is not a directory",
                folder.display()
            )));
        }

        self.prepare_index(drop_existing).await?;

        let files = discover_spreadsheets(folder);
        if files.is_empty() {
            warn!(folder = %folder.display(), "no spreadsheet found");
        }

        Ok(self.ingest_files(&files).await)
    }

    pub async fn ingest_files(&self, files: &[PathBuf]) -> IngestionReport {
        let mut report = IngestionReport::default();

        for path in files {
            report.files_seen += 1;

            match self.preparer().prepare_file(path) {
                Ok(prepared) => self.index_prepared(path, prepared, &mut report).await,
                Err(error) => {
                    let stage = match error {
                        IngestError::SheetParse(_) => IncidentStage::Parse,
                        _ => IncidentStage::Read,
                    };
                    report.record_incident(path, stage, error.to_string());
                }
            }
        }

        info!(
            files_seen = report.files_seen,
            files_processed = report.files_processed,
            chunks_produced = report.chunks_produced,
            chunks_indexed = report.chunks_indexed,
            incidents = report.incidents.len(),
            "ingestion finished"
        );
        report
    }

    async fn index_prepared(
        &self,
        path: &Path,
        prepared: PreparedFile,
        report: &mut IngestionReport,
    ) {
        if let Some(reason) = &prepared.store_error {
            report.record_incident(path, IncidentStage::Store, reason.clone());
        }

        report.chunks_produced += prepared.records.len();
        info!(
            file = %prepared.source.basename,
            sections = prepared.sections.len(),
            chunks = prepared.records.len(),
            "file prepared"
        );

        if prepared.records.is_empty() {
            report.files_processed += 1;
            return;
        }

        let PreparedFile { mut records, .. } = prepared;
        let texts: Vec<String> = records.iter().map(|record| record.content.clone()).collect();
        let vectors = match self.embed_all(&texts).await {
            Ok(vectors) => vectors,
            Err(error) => {
                report.record_incident(path, IncidentStage::Embed, error.to_string());
                return;
            }
        };
        for (record, vector) in records.iter_mut().zip(vectors) {
            record.embedding = vector;
        }

        match self.index.upsert_bulk(&records).await {
            Ok(bulk) => {
                report.chunks_indexed += bulk.succeeded;
                for failure in bulk.failures {
                    report.record_incident(
                        path,
                        IncidentStage::Index,
                        format!("{}: {}", failure.id, failure.reason),
                    );
                }
                report.files_processed += 1;
            }
            Err(error) => {
                report.record_incident(path, IncidentStage::Index, error.to_string());
            }
        }
    }

    pub fn preview(&self, path: &Path) -> Result<Vec<SectionSummary>, IngestError> {
        let sheets = self.extractor.extract_sheets(path)?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let config = ChunkingConfig::from(&self.options);

        Ok(self
            .detector
            .detect(
                &sheets,
                &self.options.requirement_keywords,
                &self.options.response_keywords,
            )
            .iter()
            .map(|section| SectionSummary::new(section, build_chunks(section, name, config).len()))
            .collect())
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(&query.text).await?;
        self.index.search(&vector, query.top_k).await
    }

    pub async fn set_obsolete(
        &self,
        chunk_id: &str,
        obsolete: bool,
    ) -> Result<ChunkStatus, SearchError> {
        self.index.obsolescence().set_obsolete(chunk_id, obsolete).await
    }

    pub fn resolve_source(&self, hit: &SearchHit) -> Option<PathBuf> {
        self.store.resolve(&hit.record.provenance())
    }

    fn preparer(&self) -> FilePreparer<'_, X, SubstringMatcher> {
        FilePreparer {
            store: &self.store,
            extractor: &self.extractor,
            detector: &self.detector,
            options: &self.options,
            processing_version: &self.index.settings().processing_version,
        }
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.index.settings().batch_size.max(1)) {
            vectors.extend(self.embedder.embed_batch(batch).await?);
        }
        if vectors.len() != texts.len() {
            return Err(SearchError::Request(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}
