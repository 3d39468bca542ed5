use crate::error::QueryError;
use crate::models::{EmbeddingRecord, QueryScope, RetrievalCandidate};
use async_trait::async_trait;

/// Persistence and nearest-neighbor search for embedded chunks.
///
/// Implementations must keep `bulk_insert` all-or-nothing per document
/// (no half-indexed documents), filter `nearest` results to the given
/// tenant scope, and return candidates ordered by ascending cosine
/// distance with their stored vectors attached so the diversity pass
/// can compare them.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Prepares backing storage for vectors of the given width and
    /// fails fast when an existing schema disagrees.
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), QueryError>;

    async fn bulk_insert(
        &self,
        document_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<(), QueryError>;

    async fn nearest(
        &self,
        scope: QueryScope,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalCandidate>, QueryError>;

    /// Removes every record belonging to a document (cascade on
    /// document deletion).
    async fn delete_document(&self, document_id: &str) -> Result<(), QueryError>;
}
