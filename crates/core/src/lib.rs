pub mod chunking;
pub mod detector;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod ingest;
pub mod keywords;
pub mod models;
pub mod obsolescence;
pub mod orchestrator;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, make_chunk_id, ChunkingConfig};
pub use detector::{SectionDetector, DEFAULT_HEADER_SCAN_ROWS};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, Result, SearchError};
pub use extractor::{is_spreadsheet, CalamineExtractor, SheetExtractor};
pub use indexer::{index_schema, IndexManager};
pub use ingest::{
    discover_spreadsheets, enrich_chunks, FilePreparer, Incident, IncidentStage, IngestionReport,
    PreparedFile, SectionSummary,
};
pub use keywords::{KeywordMatcher, KeywordSet, SubstringMatcher};
pub use models::{
    BulkFailure, BulkReport, ChunkKind, ColumnMatch, DetectedSection, IndexRecord, IndexSettings,
    IndexStats, IngestionOptions, SearchHit, SearchQuery, Sheet, SheetChunk, SourceFile,
    PROCESSING_VERSION,
};
pub use obsolescence::{ChunkStatus, ObsolescenceController};
pub use orchestrator::IngestCoordinator;
pub use store::{digest_bytes, ContentStore, StoredFile};
pub use stores::{ElasticConfig, ElasticsearchStore, InMemoryIndex};
pub use traits::{SearchBackend, VectorQuery};
