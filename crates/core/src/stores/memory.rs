use crate::models::{BulkFailure, BulkReport, IndexRecord, IndexStats, SearchHit};
use crate::traits::{SearchBackend, VectorQuery};
use crate::SearchError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

const BACKEND: &str = "memory";

#[derive(Default)]
struct MemoryIndex {
    dimensions: Option<usize>,
    visible: BTreeMap<String, IndexRecord>,
    pending: BTreeMap<String, IndexRecord>,
    indexing_total: u64,
    search_total: u64,
}

impl MemoryIndex {
    fn latest(&self, id: &str) -> Option<&IndexRecord> {
        self.pending.get(id).or_else(|| self.visible.get(id))
    }
}

#[derive(Default)]
pub struct InMemoryIndex {
    indices: RwLock<HashMap<String, MemoryIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_writes(&self, index: &str) -> usize {
        let indices = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        indices.get(index).map_or(0, |state| state.pending.len())
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn missing_index(index: &str) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("no such index: {index}"),
    }
}

#[async_trait]
impl SearchBackend for InMemoryIndex {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_index_if_absent(
        &self,
        index: &str,
        schema: &Value,
    ) -> Result<bool, SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        if indices.contains_key(index) {
            return Ok(false);
        }

        let dimensions = schema
            .pointer("/mappings/properties/embedding/dims")
            .and_then(Value::as_u64)
            .map(|dims| dims as usize);
        indices.insert(
            index.to_string(),
            MemoryIndex {
                dimensions,
                ..MemoryIndex::default()
            },
        );
        Ok(true)
    }

    async fn drop_index(&self, index: &str) -> Result<bool, SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        Ok(indices.remove(index).is_some())
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<BulkReport, SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        let state = indices.entry(index.to_string()).or_default();

        let mut report = BulkReport::default();
        for record in records {
            if let Some(dims) = state.dimensions {
                if record.embedding.len() != dims {
                    report.failures.push(BulkFailure {
                        id: record.chunk_id.clone(),
                        reason: format!(
                            "embedding has {} dimensions, index expects {dims}",
                            record.embedding.len()
                        ),
                    });
                    continue;
                }
            }
            state.pending.insert(record.chunk_id.clone(), record.clone());
            state.indexing_total += 1;
            report.succeeded += 1;
        }

        Ok(report)
    }

    async fn vector_search(
        &self,
        index: &str,
        query: VectorQuery<'_>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        let state = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        state.search_total += 1;

        let mut hits: Vec<SearchHit> = state
            .visible
            .values()
            .filter(|record| !(query.exclude_obsolete && record.obsolete))
            .map(|record| {
                let score = f64::from(cosine_sim(query.vector, &record.embedding)) + 1.0;
                let mut record = record.clone();
                record.embedding.clear();
                SearchHit { score, record }
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.record.chunk_id.cmp(&right.record.chunk_id))
        });
        hits.truncate(query.top_k);
        Ok(hits)
    }

    async fn update_fields(&self, index: &str, id: &str, fields: Value) -> Result<(), SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        let state = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        let current = state.latest(id).ok_or_else(|| SearchError::NotFound {
            index: index.to_string(),
            id: id.to_string(),
        })?;

        let mut document = serde_json::to_value(current)?;
        if let (Some(target), Value::Object(changes)) = (document.as_object_mut(), fields) {
            target.extend(changes);
        }
        let updated: IndexRecord = serde_json::from_value(document)?;
        state.pending.insert(id.to_string(), updated);
        Ok(())
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        let state = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        let pending = std::mem::take(&mut state.pending);
        state.visible.extend(pending);
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64, SearchError> {
        let indices = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        let state = indices.get(index).ok_or_else(|| missing_index(index))?;
        Ok(state.visible.len() as u64)
    }

    async fn stats(&self, index: &str) -> Result<IndexStats, SearchError> {
        let indices = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = indices.get(index) else {
            return Ok(IndexStats::default());
        };

        let store_size_bytes = state
            .visible
            .values()
            .filter_map(|record| serde_json::to_vec(record).ok())
            .map(|bytes| bytes.len() as u64)
            .sum();

        Ok(IndexStats {
            exists: true,
            document_count: Some(state.visible.len() as u64),
            store_size_bytes: Some(store_size_bytes),
            indexing_total: Some(state.indexing_total),
            search_total: Some(state.search_total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record as record;
    use serde_json::json;

    fn query(vector: &[f32]) -> VectorQuery<'_> {
        VectorQuery {
            vector,
            top_k: 10,
            exclude_obsolete: true,
        }
    }

    #[tokio::test]
    async fn writes_are_visible_only_after_refresh() -> Result<(), SearchError> {
        let backend = InMemoryIndex::new();
        backend.create_index_if_absent("i", &json!({})).await?;
        backend.bulk_upsert("i", &[record("a", vec![1.0, 0.0])]).await?;

        assert_eq!(backend.count("i").await?, 0);
        assert_eq!(backend.pending_writes("i"), 1);

        backend.refresh("i").await?;
        assert_eq!(backend.count("i").await?, 1);
        assert_eq!(backend.pending_writes("i"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_strips_vectors() -> Result<(), SearchError> {
        let backend = InMemoryIndex::new();
        backend.create_index_if_absent("i", &json!({})).await?;
        backend
            .bulk_upsert(
                "i",
                &[record("far", vec![0.0, 1.0]), record("near", vec![1.0, 0.1])],
            )
            .await?;
        backend.refresh("i").await?;

        let hits = backend.vector_search("i", query(&[1.0, 0.0])).await?;
        assert_eq!(hits[0].record.chunk_id, "near");
        assert!(hits.iter().all(|hit| hit.score >= 0.0));
        assert!(hits.iter().all(|hit| hit.record.embedding.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_dimension_is_a_per_record_failure() -> Result<(), SearchError> {
        let backend = InMemoryIndex::new();
        let schema = json!({"mappings": {"properties": {"embedding": {"dims": 2}}}});
        backend.create_index_if_absent("i", &schema).await?;

        let report = backend
            .bulk_upsert("i", &[record("ok", vec![1.0, 0.0]), record("bad", vec![1.0])])
            .await?;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].id, "bad");
        Ok(())
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() -> Result<(), SearchError> {
        let backend = InMemoryIndex::new();
        backend.create_index_if_absent("i", &json!({})).await?;
        let result = backend
            .update_fields("i", "missing", json!({"obsolete": true}))
            .await;
        assert!(matches!(result, Err(SearchError::NotFound { .. })));
        Ok(())
    }
}
