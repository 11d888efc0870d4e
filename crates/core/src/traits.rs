use crate::models::{BulkReport, IndexRecord, IndexStats, SearchHit};
use crate::SearchError;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct VectorQuery<'a> {
    pub vector: &'a [f32],
    pub top_k: usize,
    pub exclude_obsolete: bool,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create_index_if_absent(&self, index: &str, schema: &Value)
        -> Result<bool, SearchError>;

    async fn drop_index(&self, index: &str) -> Result<bool, SearchError>;

    async fn bulk_upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<BulkReport, SearchError>;

    async fn vector_search(
        &self,
        index: &str,
        query: VectorQuery<'_>,
    ) -> Result<Vec<SearchHit>, SearchError>;

    async fn update_fields(&self, index: &str, id: &str, fields: Value)
        -> Result<(), SearchError>;

    async fn refresh(&self, index: &str) -> Result<(), SearchError>;

    async fn count(&self, index: &str) -> Result<u64, SearchError>;

    async fn stats(&self, index: &str) -> Result<IndexStats, SearchError>;
}
