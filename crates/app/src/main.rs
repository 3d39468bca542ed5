use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_core::{
    CharacterNgramEmbedder, ChatHttpGenerator, ChunkStore, ChunkingOptions, DocumentLoader,
    Embedder, GenerationParams, HttpEmbedder, QdrantStore, QueryScope, RagPipeline,
    RetrievalOptions, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection holding embedded chunks
    #[arg(long, default_value = "doc_chunks")]
    qdrant_collection: String,

    /// Embedding vector width shared by embedder and store schema
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// OpenAI-compatible embeddings base URL; local hashed embeddings
    /// are used when unset
    #[arg(long)]
    embedding_url: Option<String>,

    /// Embedding model name for the HTTP embedder
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// API key for the embedding endpoint
    #[arg(long, env = "DOCQA_EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// OpenAI-compatible chat-completions base URL
    #[arg(long, default_value = "https://api.openai.com/v1")]
    generator_url: String,

    /// Answer model name
    #[arg(long, default_value = "gpt-4o-mini")]
    generator_model: String,

    /// API key for the generator endpoint
    #[arg(long, env = "DOCQA_GENERATOR_API_KEY")]
    generator_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a document file, or every supported file under a folder.
    Ingest {
        /// File or folder to ingest
        #[arg(long)]
        path: String,
        /// Owning customer
        #[arg(long)]
        customer_id: i64,
        /// Access-scope tag
        #[arg(long)]
        tag_id: i64,
        /// Document id; generated when omitted (single-file ingestion only)
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Ask a question against a tenant's ingested documents.
    Ask {
        /// The question
        #[arg(long)]
        query: String,
        /// Owning customer
        #[arg(long)]
        customer_id: i64,
        /// Access-scope tag
        #[arg(long)]
        tag_id: i64,
        /// Provider label forwarded to the generator
        #[arg(long, default_value = "openai")]
        provider: String,
        #[arg(long, default_value_t = 0.2)]
        temperature: f32,
        #[arg(long, default_value_t = 0.9)]
        top_p: f32,
        #[arg(long, default_value_t = 1024)]
        max_tokens: u32,
        /// Number of chunks grounding the answer
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Over-fetch factor for the diversity pass
        #[arg(long, default_value_t = 3)]
        candidate_multiplier: usize,
        /// Hard similarity cutoff in [0, 1]
        #[arg(long, default_value_t = 0.3)]
        min_similarity: f32,
        /// Relevance/diversity balance in [0, 1]
        #[arg(long, default_value_t = 0.5)]
        mmr_lambda: f32,
    },
    /// Remove an ingested document's chunks from the store.
    Delete {
        #[arg(long)]
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    match cli.embedding_url.clone() {
        Some(url) => {
            let embedder = HttpEmbedder::new(
                url,
                cli.embedding_model.clone(),
                cli.embedding_api_key.clone(),
                cli.embedding_dimensions,
            )?;
            run(cli, embedder).await
        }
        None => {
            let embedder = CharacterNgramEmbedder {
                dimensions: cli.embedding_dimensions,
            };
            run(cli, embedder).await
        }
    }
}

async fn run<E>(cli: Cli, embedder: E) -> anyhow::Result<()>
where
    E: Embedder + Clone,
{
    let store = QdrantStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        cli.embedding_dimensions,
    )?;
    let generator = ChatHttpGenerator::new(
        &cli.generator_url,
        &cli.generator_model,
        cli.generator_api_key.clone(),
    )?;

    match cli.command {
        Command::Ingest {
            path,
            customer_id,
            tag_id,
            document_id,
        } => {
            let pipeline = RagPipeline::new(
                DocumentLoader::new()?,
                embedder,
                store,
                generator,
                ChunkingOptions::default(),
                RetrievalOptions::default(),
            )
            .await?;

            let scope = QueryScope::new(customer_id, tag_id);
            let target = Path::new(&path);

            if target.is_dir() {
                let report = pipeline.index_folder(target, scope).await?;
                for skipped in &report.skipped {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }
                let chunk_total: usize = report
                    .summaries
                    .iter()
                    .map(|summary| summary.chunk_count)
                    .sum();
                println!(
                    "{} documents ingested ({} chunks, {} skipped)",
                    report.summaries.len(),
                    chunk_total,
                    report.skipped.len()
                );
            } else {
                let document_id =
                    document_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let summary = pipeline.index_document(&document_id, target, scope).await?;
                println!(
                    "{}: {} chunks ingested as document {}",
                    summary.source_filename, summary.chunk_count, summary.document_id
                );
            }
        }
        Command::Ask {
            query,
            customer_id,
            tag_id,
            provider,
            temperature,
            top_p,
            max_tokens,
            top_k,
            candidate_multiplier,
            min_similarity,
            mmr_lambda,
        } => {
            let pipeline = RagPipeline::new(
                DocumentLoader::new()?,
                embedder,
                store,
                generator,
                ChunkingOptions::default(),
                RetrievalOptions {
                    top_k,
                    candidate_multiplier,
                    min_similarity,
                    mmr_lambda,
                },
            )
            .await?;

            let params = GenerationParams {
                provider,
                temperature,
                top_p,
                max_tokens,
            };
            let result = pipeline
                .answer_query(&query, QueryScope::new(customer_id, tag_id), &params)
                .await?;

            println!("{}", result.answer);
            println!(
                "\n[model={} duration_ms={} sources={}]",
                result.metadata.model,
                result.metadata.duration_ms,
                result.sources.len()
            );
        }
        Command::Delete { document_id } => {
            store.delete_document(&document_id).await?;
            println!("document {document_id} deleted");
        }
    }

    Ok(())
}
