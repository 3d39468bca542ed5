use crate::embeddings::ensure_dimensions;
use crate::error::QueryError;
use crate::models::{EmbeddingRecord, QueryScope, RetrievalCandidate};
use crate::retriever::cosine_similarity;
use crate::store::ChunkStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Process-local chunk store. Backs tests and store-less local runs;
/// cloning shares the same underlying records.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    dimensions: Option<usize>,
    records: Vec<EmbeddingRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), QueryError> {
        let mut inner = lock(&self.inner)?;
        match inner.dimensions {
            Some(existing) if existing != dimensions => Err(QueryError::DimensionMismatch {
                expected: existing,
                actual: dimensions,
            }),
            _ => {
                inner.dimensions = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn bulk_insert(
        &self,
        document_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<(), QueryError> {
        let mut inner = lock(&self.inner)?;

        // Validate the whole batch before touching storage so a bad
        // record cannot leave the document half-indexed.
        if let Some(dimensions) = inner.dimensions {
            for record in records {
                ensure_dimensions(dimensions, &record.embedding)?;
            }
        }
        for record in records {
            if record.document_id != document_id {
                return Err(QueryError::Request(format!(
                    "record document_id {} does not match batch document {}",
                    record.document_id, document_id
                )));
            }
        }

        inner.records.extend_from_slice(records);
        Ok(())
    }

    async fn nearest(
        &self,
        scope: QueryScope,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, QueryError> {
        let inner = lock(&self.inner)?;

        let mut candidates: Vec<RetrievalCandidate> = inner
            .records
            .iter()
            .filter(|record| record.customer_id == scope.customer_id && record.tag_id == scope.tag_id)
            .map(|record| RetrievalCandidate {
                source_filename: record.source_filename.clone(),
                parent_chunk_text: record.parent_chunk_text.clone(),
                page_number: record.page_number,
                section_title: record.section_title.clone(),
                embedding: record.embedding.clone(),
                distance: 1.0 - cosine_similarity(query_vector, &record.embedding),
            })
            .collect();

        candidates.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), QueryError> {
        let mut inner = lock(&self.inner)?;
        inner.records.retain(|record| record.document_id != document_id);
        Ok(())
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> Result<std::sync::MutexGuard<'_, Inner>, QueryError> {
    inner
        .lock()
        .map_err(|_| QueryError::Request("in-memory store lock poisoned".to_string()))
}
