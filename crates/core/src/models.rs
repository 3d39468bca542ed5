use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, QueryError};

/// Category assigned to one extracted unit of document content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ElementCategory {
    NarrativeText,
    ListItem,
    Title,
    Table,
    UncategorizedText,
    Other,
}

/// One unit of extracted document content. Produced by a loader,
/// consumed by the chunker, discarded afterwards.
#[derive(Debug, Clone)]
pub struct Element {
    pub text: String,
    pub category: ElementCategory,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
}

/// A bounded span of concatenated element text. `chunk_text` is the
/// embedding-sized unit; `parent_chunk_text` is the surrounding window
/// `[i-1, i+2)` used only as generation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_text: String,
    pub parent_chunk_text: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
}

/// Persisted association of a chunk with its vector and tenancy
/// metadata. Created once per document ingestion, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub document_id: String,
    pub source_filename: String,
    pub chunk_text: String,
    pub parent_chunk_text: String,
    pub embedding: Vec<f32>,
    pub customer_id: i64,
    pub tag_id: i64,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Mandatory tenant filter applied to every retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct QueryScope {
    pub customer_id: i64,
    pub tag_id: i64,
}

impl QueryScope {
    pub fn new(customer_id: i64, tag_id: i64) -> Self {
        Self {
            customer_id,
            tag_id,
        }
    }
}

/// In-memory projection of an embedding record fetched for one query.
/// The vector stays retrieval-internal; callers see [`SourceChunk`].
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub source_filename: String,
    pub parent_chunk_text: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub embedding: Vec<f32>,
    pub distance: f32,
}

impl RetrievalCandidate {
    /// Cosine similarity recovered from the store's distance.
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }

    pub fn into_source_chunk(self) -> SourceChunk {
        SourceChunk {
            source_filename: self.source_filename,
            parent_chunk_text: self.parent_chunk_text,
            page_number: self.page_number,
            section_title: self.section_title,
        }
    }
}

/// What the retriever hands to the answer assembler: enough to cite a
/// source and build context, nothing retrieval-internal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceChunk {
    pub source_filename: String,
    pub parent_chunk_text: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    /// Character budget per chunk.
    pub max_chunk_size: usize,
    /// Trailing characters carried forward across a size break.
    pub overlap: usize,
    /// A title boundary only forces a break once the open chunk has
    /// at least this many characters.
    pub min_chunk_size: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 500,
            overlap: 50,
            min_chunk_size: 120,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.max_chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max_chunk_size {}",
                self.overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Final number of chunks handed to the assembler.
    pub top_k: usize,
    /// Over-fetch factor giving the diversity pass material to choose from.
    pub candidate_multiplier: usize,
    /// Hard similarity cutoff; candidates below it are never eligible.
    pub min_similarity: f32,
    /// Relevance/diversity balance: 1.0 is pure relevance.
    pub mmr_lambda: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_multiplier: 3,
            min_similarity: 0.3,
            mmr_lambda: 0.5,
        }
    }
}

impl RetrievalOptions {
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.top_k == 0 {
            return Err(QueryError::InvalidConfig(
                "top_k must be positive".to_string(),
            ));
        }
        if self.candidate_multiplier < 1 {
            return Err(QueryError::InvalidConfig(
                "candidate_multiplier must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(QueryError::InvalidConfig(format!(
                "min_similarity {} must be within [0, 1]",
                self.min_similarity
            )));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(QueryError::InvalidConfig(format!(
                "mmr_lambda {} must be within [0, 1]",
                self.mmr_lambda
            )));
        }
        Ok(())
    }

    /// Number of candidates fetched from the store before filtering.
    pub fn candidates_to_fetch(&self) -> usize {
        self.top_k.saturating_mul(self.candidate_multiplier)
    }
}

/// Opaque tuning values forwarded to the answer generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub provider: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub model: String,
    pub duration_ms: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// The one result shape every query path emits, fallback included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub metadata: AnswerMetadata,
}

/// Outcome of indexing a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub document_id: String,
    pub source_filename: String,
    pub chunk_count: usize,
}
