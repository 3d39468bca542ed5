use crate::answer::AnswerAssembler;
use crate::chunking::chunk_elements;
use crate::embeddings::{ensure_dimensions, Embedder};
use crate::error::{IngestError, QueryError};
use crate::generation::AnswerGenerator;
use crate::loader::{ElementLoader, SUPPORTED_EXTENSIONS};
use crate::models::{
    AnswerResult, ChunkingOptions, EmbeddingRecord, GenerationParams, IngestionSummary,
    QueryScope, RetrievalOptions, SourceChunk,
};
use crate::retriever::Retriever;
use crate::store::ChunkStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// A document skipped by best-effort folder ingestion.
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub summaries: Vec<IngestionSummary>,
    pub skipped: Vec<SkippedDocument>,
}

/// The write and read paths of the backend behind one façade.
///
/// Capabilities are injected once at construction; the pipeline holds
/// no per-request state, so one instance serves concurrent ingestions
/// and queries.
pub struct RagPipeline<L, E, S, G> {
    loader: L,
    embedder: E,
    store: S,
    retriever: Retriever<E, S>,
    assembler: AnswerAssembler<G>,
    chunking: ChunkingOptions,
}

impl<L, E, S, G> RagPipeline<L, E, S, G>
where
    L: ElementLoader,
    E: Embedder + Clone,
    S: ChunkStore + Clone,
    G: AnswerGenerator,
{
    /// Validates configuration and prepares the store schema. A
    /// dimension disagreement between embedder and store fails here,
    /// before any request is served.
    pub async fn new(
        loader: L,
        embedder: E,
        store: S,
        generator: G,
        chunking: ChunkingOptions,
        retrieval: RetrievalOptions,
    ) -> Result<Self, IngestError> {
        chunking.validate()?;
        store.ensure_schema(embedder.dimensions()).await?;
        let retriever = Retriever::new(embedder.clone(), store.clone(), retrieval)?;

        Ok(Self {
            loader,
            embedder,
            store,
            retriever,
            assembler: AnswerAssembler::new(generator),
            chunking,
        })
    }

    /// Loads, chunks, embeds, and persists one document for a tenant.
    /// The store write is a single all-or-nothing batch; any failure
    /// leaves no partial state behind.
    pub async fn index_document(
        &self,
        document_id: &str,
        path: &Path,
        scope: QueryScope,
    ) -> Result<IngestionSummary, IngestError> {
        let source_filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?;

        let elements = self.loader.load_elements(path)?;
        let chunks = chunk_elements(document_id, &elements, &self.chunking)?;

        if chunks.is_empty() {
            info!(document_id, file = %source_filename, "document produced no chunks");
            return Ok(IngestionSummary {
                document_id: document_id.to_string(),
                source_filename,
                chunk_count: 0,
            });
        }

        // One embedding call per document, not per chunk.
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.chunk_text.clone()).collect();
        let embeddings = self.embedder.embed_many(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestError::Backend(QueryError::Request(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            ))));
        }
        for embedding in &embeddings {
            ensure_dimensions(self.embedder.dimensions(), embedding)?;
        }

        let created_at = Utc::now();
        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddingRecord {
                document_id: chunk.document_id.clone(),
                source_filename: source_filename.clone(),
                chunk_text: chunk.chunk_text.clone(),
                parent_chunk_text: chunk.parent_chunk_text.clone(),
                embedding,
                customer_id: scope.customer_id,
                tag_id: scope.tag_id,
                page_number: chunk.page_number,
                section_title: chunk.section_title.clone(),
                created_at,
            })
            .collect();

        self.store.bulk_insert(document_id, &records).await?;

        info!(
            document_id,
            file = %source_filename,
            chunk_count = records.len(),
            customer_id = scope.customer_id,
            tag_id = scope.tag_id,
            "document indexed"
        );

        Ok(IngestionSummary {
            document_id: document_id.to_string(),
            source_filename,
            chunk_count: records.len(),
        })
    }

    /// Best-effort ingestion of every supported file under a folder.
    /// Unreadable documents are reported, not fatal.
    pub async fn index_folder(
        &self,
        folder: &Path,
        scope: QueryScope,
    ) -> Result<IngestionReport, IngestError> {
        let files = discover_document_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported documents found in {}",
                folder.display()
            )));
        }

        let mut summaries = Vec::new();
        let mut skipped = Vec::new();

        for path in files {
            let document_id = Uuid::new_v4().to_string();
            match self.index_document(&document_id, &path, scope).await {
                Ok(summary) => summaries.push(summary),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping document");
                    skipped.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(IngestionReport { summaries, skipped })
    }

    /// Scoped retrieval without generation; selection order, vectors
    /// withheld.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: QueryScope,
    ) -> Result<Vec<SourceChunk>, QueryError> {
        self.retriever.retrieve(query, scope).await
    }

    /// The full read path: retrieve, assemble context and citations,
    /// generate, and append the sources section.
    pub async fn answer_query(
        &self,
        query: &str,
        scope: QueryScope,
        params: &GenerationParams,
    ) -> Result<AnswerResult, QueryError> {
        let chunks = self.retriever.retrieve(query, scope).await?;
        Ok(self.assembler.answer(query, &chunks, params).await)
    }

    /// Removes a document's records from the store (cascade on
    /// document deletion in the surrounding application).
    pub async fn delete_document(&self, document_id: &str) -> Result<(), QueryError> {
        self.store.delete_document(document_id).await
    }
}

/// Recursively collects supported document files, sorted for
/// reproducible ingestion order.
pub fn discover_document_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}
