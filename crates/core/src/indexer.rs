use crate::models::{BulkFailure, BulkReport, IndexRecord, IndexSettings, IndexStats, SearchHit};
use crate::obsolescence::ObsolescenceController;
use crate::traits::{SearchBackend, VectorQuery};
use crate::SearchError;
use serde_json::{json, Value};
use tracing::{info, warn};

pub fn index_schema(dimensions: usize) -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
            "analysis": {
                "analyzer": {
                    "french_analyzer": {
                        "tokenizer": "standard",
                        "filter": ["lowercase", "french_stemmer", "stop_french"]
                    }
                },
                "filter": {
                    "french_stemmer": {"type": "stemmer", "language": "french"},
                    "stop_french": {"type": "stop", "stopwords": "_french_"}
                }
            }
        },
        "mappings": {
            "properties": {
                "content": {
                    "type": "text",
                    "analyzer": "french_analyzer",
                    "fields": {"keyword": {"type": "keyword", "ignore_above": 256}}
                },
                "embedding": {
                    "type": "dense_vector",
                    "dims": dimensions,
                    "index": true,
                    "similarity": "cosine"
                },
                "obsolete": {"type": "boolean"},
                "content_sha256": {"type": "keyword"},
                "source": {"type": "keyword"},
                "source_basename": {"type": "keyword"},
                "source_sha256": {"type": "keyword"},
                "source_relpath": {"type": "keyword"},
                "sheet_name": {"type": "keyword"},
                "chunk_id": {"type": "keyword"},
                "start_row": {"type": "integer"},
                "end_row": {"type": "integer"},
                "chunk_type": {"type": "keyword"},
                "has_content": {"type": "boolean"},
                "indexed_at": {"type": "date"},
                "processing_version": {"type": "keyword"}
            }
        }
    })
}

pub struct IndexManager<B> {
    backend: B,
    settings: IndexSettings,
}

impl<B: SearchBackend> IndexManager<B> {
    pub fn new(backend: B, settings: IndexSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn index_name(&self) -> &str {
        &self.settings.index_name
    }

    pub async fn ensure_schema(&self) -> Result<bool, SearchError> {
        let created = self
            .backend
            .create_index_if_absent(self.index_name(), &index_schema(self.settings.dimensions))
            .await?;
        if created {
            info!(
                backend = self.backend.name(),
                index = self.index_name(),
                dims = self.settings.dimensions,
                "index created"
            );
        }
        Ok(created)
    }

    pub async fn recreate(&self) -> Result<(), SearchError> {
        if self.backend.drop_index(self.index_name()).await? {
            warn!(
                backend = self.backend.name(),
                index = self.index_name(),
                "existing index dropped"
            );
        }
        self.ensure_schema().await.map(|_| ())
    }

    pub async fn upsert_bulk(&self, records: &[IndexRecord]) -> Result<BulkReport, SearchError> {
        let mut report = BulkReport::default();
        let index = self.index_name();

        let (valid, invalid): (Vec<&IndexRecord>, Vec<&IndexRecord>) = records
            .iter()
            .partition(|record| record.embedding.len() == self.settings.dimensions);
        report.failures.extend(invalid.into_iter().map(|record| BulkFailure {
            id: record.chunk_id.clone(),
            reason: format!(
                "embedding has {} dimensions, index expects {}",
                record.embedding.len(),
                self.settings.dimensions
            ),
        }));

        let valid: Vec<IndexRecord> = valid.into_iter().cloned().collect();
        for batch in valid.chunks(self.settings.batch_size.max(1)) {
            match self.backend.bulk_upsert(index, batch).await {
                Ok(batch_report) => report.merge(batch_report),
                Err(error) => {
                    warn!(
                        backend = self.backend.name(),
                        index,
                        batch = batch.len(),
                        error = %error,
                        "bulk batch rejected"
                    );
                    report.failures.extend(batch.iter().map(|record| BulkFailure {
                        id: record.chunk_id.clone(),
                        reason: error.to_string(),
                    }));
                }
            }
        }

        if report.succeeded > 0 {
            self.backend.refresh(index).await?;
        }

        info!(
            backend = self.backend.name(),
            index,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "bulk upsert finished"
        );
        Ok(report)
    }

    pub async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query_vector.len() != self.settings.dimensions {
            return Err(SearchError::Dimension {
                expected: self.settings.dimensions,
                actual: query_vector.len(),
            });
        }

        self.backend
            .vector_search(
                self.index_name(),
                VectorQuery {
                    vector: query_vector,
                    top_k,
                    exclude_obsolete: true,
                },
            )
            .await
    }

    pub async fn count(&self) -> Result<u64, SearchError> {
        self.backend.count(self.index_name()).await
    }

    pub async fn stats(&self) -> Result<IndexStats, SearchError> {
        self.backend.stats(self.index_name()).await
    }

    pub fn obsolescence(&self) -> ObsolescenceController<'_, B> {
        ObsolescenceController::new(&self.backend, self.index_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record as record;
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn settings(dimensions: usize, batch_size: usize) -> IndexSettings {
        IndexSettings {
            index_name: "chunks".to_string(),
            dimensions,
            batch_size,
            processing_version: "test".to_string(),
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        inner: InMemoryIndex,
        batches: Mutex<Vec<usize>>,
        poison_id: Option<String>,
    }

    #[async_trait]
    impl SearchBackend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }

        async fn create_index_if_absent(
            &self,
            index: &str,
            schema: &Value,
        ) -> Result<bool, SearchError> {
            self.inner.create_index_if_absent(index, schema).await
        }

        async fn drop_index(&self, index: &str) -> Result<bool, SearchError> {
            self.inner.drop_index(index).await
        }

        async fn bulk_upsert(
            &self,
            index: &str,
            records: &[IndexRecord],
        ) -> Result<BulkReport, SearchError> {
            self.batches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(records.len());
            if let Some(poison) = &self.poison_id {
                if records.iter().any(|record| &record.chunk_id == poison) {
                    return Err(SearchError::Request("batch too large".to_string()));
                }
            }
            self.inner.bulk_upsert(index, records).await
        }

        async fn vector_search(
            &self,
            index: &str,
            query: VectorQuery<'_>,
        ) -> Result<Vec<SearchHit>, SearchError> {
            self.inner.vector_search(index, query).await
        }

        async fn update_fields(
            &self,
            index: &str,
            id: &str,
            fields: Value,
        ) -> Result<(), SearchError> {
            self.inner.update_fields(index, id, fields).await
        }

        async fn refresh(&self, index: &str) -> Result<(), SearchError> {
            self.inner.refresh(index).await
        }

        async fn count(&self, index: &str) -> Result<u64, SearchError> {
            self.inner.count(index).await
        }

        async fn stats(&self, index: &str) -> Result<IndexStats, SearchError> {
            self.inner.stats(index).await
        }
    }

    #[test]
    fn schema_declares_vector_and_soft_delete_fields() {
        let schema = index_schema(768);
        assert_eq!(
            schema.pointer("/mappings/properties/embedding/dims"),
            Some(&json!(768))
        );
        assert_eq!(
            schema.pointer("/mappings/properties/embedding/similarity"),
            Some(&json!("cosine"))
        );
        assert_eq!(
            schema.pointer("/mappings/properties/obsolete/type"),
            Some(&json!("boolean"))
        );
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() -> Result<(), SearchError> {
        let manager = IndexManager::new(InMemoryIndex::new(), settings(2, 100));
        assert!(manager.ensure_schema().await?);
        assert!(!manager.ensure_schema().await?);
        Ok(())
    }

    #[tokio::test]
    async fn upserts_are_batched_and_refreshed() -> Result<(), SearchError> {
        let manager = IndexManager::new(RecordingBackend::default(), settings(2, 2));
        manager.ensure_schema().await?;

        let records: Vec<_> = (0..5)
            .map(|i| record(&format!("c{i}"), vec![1.0, i as f32]))
            .collect();
        let report = manager.upsert_bulk(&records).await?;

        assert!(report.is_success());
        assert_eq!(report.succeeded, 5);
        assert_eq!(
            *manager
                .backend()
                .batches
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            vec![2, 2, 1]
        );
        assert_eq!(manager.count().await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn reindexing_same_id_overwrites() -> Result<(), SearchError> {
        let manager = IndexManager::new(InMemoryIndex::new(), settings(2, 100));
        manager.ensure_schema().await?;

        manager.upsert_bulk(&[record("f_S_L2", vec![1.0, 0.0])]).await?;
        manager.upsert_bulk(&[record("f_S_L2", vec![1.0, 0.0])]).await?;

        assert_eq!(manager.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_batch_and_bad_vectors_are_enumerated() -> Result<(), SearchError> {
        let backend = RecordingBackend {
            poison_id: Some("c2".to_string()),
            ..RecordingBackend::default()
        };
        let manager = IndexManager::new(backend, settings(2, 2));
        manager.ensure_schema().await?;

        let mut records: Vec<_> = (0..4)
            .map(|i| record(&format!("c{i}"), vec![0.0, 1.0]))
            .collect();
        records.push(record("short", vec![1.0]));

        let report = manager.upsert_bulk(&records).await?;
        assert!(!report.is_success());
        assert_eq!(report.succeeded, 2);

        let mut failed: Vec<_> = report.failures.iter().map(|f| f.id.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["c2", "c3", "short"]);
        assert_eq!(manager.count().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn search_rejects_wrong_query_dimension() {
        let manager = IndexManager::new(InMemoryIndex::new(), settings(3, 100));
        let result = manager.search(&[1.0], 5).await;
        assert!(matches!(
            result,
            Err(SearchError::Dimension { expected: 3, actual: 1 })
        ));
    }
}
