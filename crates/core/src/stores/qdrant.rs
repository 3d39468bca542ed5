use crate::embeddings::ensure_dimensions;
use crate::error::QueryError;
use crate::models::{EmbeddingRecord, QueryScope, RetrievalCandidate};
use crate::store::ChunkStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

/// Qdrant-backed chunk store over its REST API. Tenant isolation is
/// enforced server-side with a payload filter on every search.
#[derive(Clone)]
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, QueryError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn scope_filter(scope: QueryScope) -> Value {
        json!({
            "must": [
                { "key": "customer_id", "match": { "value": scope.customer_id } },
                { "key": "tag_id", "match": { "value": scope.tag_id } },
            ]
        })
    }
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), QueryError> {
        if self.vector_size != dimensions {
            return Err(QueryError::DimensionMismatch {
                expected: self.vector_size,
                actual: dimensions,
            });
        }

        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let existing = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize;
            if existing != dimensions {
                return Err(QueryError::DimensionMismatch {
                    expected: dimensions,
                    actual: existing,
                });
            }
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn bulk_insert(
        &self,
        document_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<(), QueryError> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records
            .iter()
            .map(|record| {
                ensure_dimensions(self.vector_size, &record.embedding)?;

                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": record.embedding,
                    "payload": {
                        "document_id": record.document_id,
                        "source_filename": record.source_filename,
                        "chunk_text": record.chunk_text,
                        "parent_chunk_text": record.parent_chunk_text,
                        "customer_id": record.customer_id,
                        "tag_id": record.tag_id,
                        "page_number": record.page_number,
                        "section_title": record.section_title,
                        "created_at": record.created_at.to_rfc3339(),
                    },
                }))
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        // Single upsert request per document keeps ingestion
        // all-or-nothing: either the whole batch lands or none of it.
        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!(
                    "bulk insert for document {} returned {}",
                    document_id,
                    response.status()
                ),
            });
        }

        Ok(())
    }

    async fn nearest(
        &self,
        scope: QueryScope,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, QueryError> {
        ensure_dimensions(self.vector_size, query_vector)?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": limit,
                "filter": Self::scope_filter(scope),
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let payload_str = |key: &str| {
                hit.pointer(&format!("/payload/{key}"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };

            let embedding = hit
                .pointer("/vector")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|value| value as f32)
                        .collect::<Vec<f32>>()
                })
                .unwrap_or_default();

            // Qdrant reports cosine similarity as the score; the store
            // contract speaks in distance.
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            candidates.push(RetrievalCandidate {
                source_filename: payload_str("source_filename").unwrap_or_default(),
                parent_chunk_text: payload_str("parent_chunk_text").unwrap_or_default(),
                page_number: hit
                    .pointer("/payload/page_number")
                    .and_then(Value::as_u64)
                    .map(|page| page as u32),
                section_title: payload_str("section_title"),
                embedding,
                distance: 1.0 - score as f32,
            });
        }

        candidates.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        Ok(candidates)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), QueryError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({
                "filter": {
                    "must": [
                        { "key": "document_id", "match": { "value": document_id } },
                    ]
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_rejects_invalid_endpoint() {
        let result = QdrantStore::new("::not-a-url::", "chunks", 128);
        assert!(matches!(result, Err(QueryError::Url(_))));
    }

    #[test]
    fn scope_filter_pins_both_tenant_keys() {
        let filter = QdrantStore::scope_filter(QueryScope::new(42, 7));
        assert_eq!(filter["must"][0]["key"], "customer_id");
        assert_eq!(filter["must"][0]["match"]["value"], 42);
        assert_eq!(filter["must"][1]["key"], "tag_id");
        assert_eq!(filter["must"][1]["match"]["value"], 7);
    }
}
