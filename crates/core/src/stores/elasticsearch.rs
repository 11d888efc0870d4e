use crate::models::{BulkFailure, BulkReport, IndexRecord, IndexStats, SearchHit};
use crate::traits::{SearchBackend, VectorQuery};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "elasticsearch";

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub endpoint: String,
    pub username: String,
    pub password: Option<String>,
    pub timeout: Duration,
    pub bulk_timeout: Duration,
    pub max_retries: u32,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9200".to_string(),
            username: "elastic".to_string(),
            password: None,
            timeout: Duration::from_secs(30),
            bulk_timeout: Duration::from_secs(120),
            max_retries: 5,
        }
    }
}

pub struct ElasticsearchStore {
    client: Arc<Client>,
    config: ElasticConfig,
}

impl ElasticsearchStore {
    pub fn new(config: ElasticConfig) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    pub async fn ping(&self) -> Result<(), SearchError> {
        let response = self.send(Method::GET, &[], |request| request).await?;
        expect_success(response).await.map(|_| ())
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = Url::parse(&self.config.endpoint)?;
        url.path_segments_mut()
            .map_err(|_| {
                SearchError::Request(format!("invalid endpoint {}", self.config.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<F>(
        &self,
        method: Method,
        segments: &[&str],
        build: F,
    ) -> Result<Response, SearchError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let url = self.url(segments)?;
        let mut attempt = 0u32;

        loop {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(password) = &self.config.password {
                request = request.basic_auth(&self.config.username, Some(password));
            }

            match build(request).send().await {
                Ok(response) => return Ok(response),
                Err(error)
                    if (error.is_connect() || error.is_timeout())
                        && attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    warn!(%url, attempt, error = %error, "retrying elasticsearch request");
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchStore {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn create_index_if_absent(
        &self,
        index: &str,
        schema: &Value,
    ) -> Result<bool, SearchError> {
        let response = self.send(Method::HEAD, &[index], |request| request).await?;

        if response.status() == StatusCode::OK {
            return Ok(false);
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .send(Method::PUT, &[index], |request| request.json(schema))
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                return Ok(false);
            }
            return Err(SearchError::Request(format!(
                "elasticsearch index setup failed: {body}"
            )));
        }

        expect_success(response).await?;
        Ok(true)
    }

    async fn drop_index(&self, index: &str) -> Result<bool, SearchError> {
        let response = self.send(Method::DELETE, &[index], |request| request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response).await?;
        Ok(true)
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<BulkReport, SearchError> {
        if records.is_empty() {
            return Ok(BulkReport::default());
        }

        let mut lines = Vec::with_capacity(records.len() * 2);
        for record in records {
            lines.push(serde_json::to_string(&json!({
                "index": {
                    "_index": index,
                    "_id": record.chunk_id,
                }
            }))?);
            lines.push(serde_json::to_string(record)?);
        }
        let payload = lines.join("\n") + "\n";

        let bulk_timeout = self.config.bulk_timeout;
        let response = self
            .send(Method::POST, &["_bulk"], |request| {
                request
                    .header("Content-Type", "application/x-ndjson")
                    .timeout(bulk_timeout)
                    .body(payload.clone())
            })
            .await?;

        let body = expect_success(response).await?;
        let report = parse_bulk_response(&body, records);
        debug!(
            index,
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "bulk request completed"
        );
        Ok(report)
    }

    async fn vector_search(
        &self,
        index: &str,
        query: VectorQuery<'_>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let filter = if query.exclude_obsolete {
            json!({"bool": {"must_not": [{"term": {"obsolete": true}}]}})
        } else {
            json!({"match_all": {}})
        };

        let body = json!({
            "size": query.top_k,
            "query": {
                "script_score": {
                    "query": filter,
                    "script": {
                        "source": "cosineSimilarity(params.query_vector, 'embedding') + 1.0",
                        "params": {"query_vector": query.vector}
                    }
                }
            },
            "_source": {"excludes": ["embedding"]}
        });

        let response = self
            .send(Method::POST, &[index, "_search"], |request| request.json(&body))
            .await?;
        let response_json = expect_success(response).await?;

        let hits = response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for raw in hits {
            let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            let source = raw.pointer("/_source").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<IndexRecord>(source) {
                Ok(record) => result.push(SearchHit { score, record }),
                Err(error) => {
                    let id = raw.pointer("/_id").and_then(Value::as_str).unwrap_or_default();
                    warn!(id, error = %error, "skipping hit with unexpected source shape");
                }
            }
        }

        Ok(result)
    }

    async fn update_fields(&self, index: &str, id: &str, fields: Value) -> Result<(), SearchError> {
        let body = json!({ "doc": fields });
        let response = self
            .send(Method::POST, &[index, "_update", id], |request| request.json(&body))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SearchError::NotFound {
                index: index.to_string(),
                id: id.to_string(),
            });
        }
        expect_success(response).await.map(|_| ())
    }

    async fn refresh(&self, index: &str) -> Result<(), SearchError> {
        let response = self
            .send(Method::POST, &[index, "_refresh"], |request| request)
            .await?;
        expect_success(response).await.map(|_| ())
    }

    async fn count(&self, index: &str) -> Result<u64, SearchError> {
        let response = self.send(Method::GET, &[index, "_count"], |request| request).await?;
        let body = expect_success(response).await?;
        body.pointer("/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count missing from response".to_string(),
            })
    }

    async fn stats(&self, index: &str) -> Result<IndexStats, SearchError> {
        let response = self.send(Method::HEAD, &[index], |request| request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(IndexStats::default());
        }

        let document_count = match self.count(index).await {
            Ok(count) => Some(count),
            Err(error) => {
                warn!(index, error = %error, "document count unavailable");
                None
            }
        };

        let totals = match self.send(Method::GET, &[index, "_stats"], |request| request).await {
            Ok(response) => expect_success(response).await.ok(),
            Err(error) => {
                warn!(index, error = %error, "index stats unavailable");
                None
            }
        };
        let total = |pointer: &str| {
            totals
                .as_ref()
                .and_then(|body| body.pointer(&format!("/_all/total{pointer}")))
                .and_then(Value::as_u64)
        };

        Ok(IndexStats {
            exists: true,
            document_count,
            store_size_bytes: total("/store/size_in_bytes"),
            indexing_total: total("/indexing/index_total"),
            search_total: total("/search/query_total"),
        })
    }
}

async fn expect_success(response: Response) -> Result<Value, SearchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{status}: {body}"),
        });
    }

    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn parse_bulk_response(body: &Value, records: &[IndexRecord]) -> BulkReport {
    let items = body
        .pointer("/items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut report = BulkReport::default();
    for (position, item) in items.iter().enumerate() {
        let action = item.pointer("/index").unwrap_or(item);
        let status = action.pointer("/status").and_then(Value::as_u64).unwrap_or(0);
        if (200..300).contains(&status) {
            report.succeeded += 1;
            continue;
        }

        let id = action
            .pointer("/_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| records.get(position).map(|record| record.chunk_id.clone()))
            .unwrap_or_default();
        let reason = action
            .pointer("/error/reason")
            .or_else(|| action.pointer("/error/type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("status {status}"));
        report.failures.push(BulkFailure { id, reason });
    }

    if items.len() < records.len() {
        for record in &records[items.len()..] {
            report.failures.push(BulkFailure {
                id: record.chunk_id.clone(),
                reason: "missing from bulk response".to_string(),
            });
        }
    }

    report
}
