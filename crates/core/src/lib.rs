pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod stores;

pub use answer::{
    build_citations, build_context, AnswerAssembler, CONTEXT_SEPARATOR, MAX_CITED_SOURCES,
    NO_CONTEXT_ANSWER,
};
pub use chunking::{chunk_elements, normalize_whitespace};
pub use embeddings::{
    ensure_dimensions, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, QueryError};
pub use generation::{
    AnswerGenerator, ChatHttpGenerator, GeneratedAnswer, GenerationRequest, UNANSWERABLE_PHRASE,
};
pub use loader::{DocumentLoader, ElementLoader, SUPPORTED_EXTENSIONS};
pub use models::{
    AnswerMetadata, AnswerResult, Chunk, ChunkingOptions, Element, ElementCategory,
    EmbeddingRecord, GenerationParams, IngestionSummary, QueryScope, RetrievalCandidate,
    RetrievalOptions, SourceChunk,
};
pub use pipeline::{
    discover_document_files, IngestionReport, RagPipeline, SkippedDocument,
};
pub use retriever::{cosine_similarity, mmr_select, Retriever};
pub use store::ChunkStore;
pub use stores::{InMemoryStore, QdrantStore};
