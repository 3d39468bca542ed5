use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::models::{QueryScope, RetrievalCandidate, RetrievalOptions, SourceChunk};
use crate::store::ChunkStore;
use tracing::debug;

/// Directional closeness of two vectors, magnitude-independent.
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;

    for (left, right) in a.iter().zip(b.iter()) {
        dot += left * right;
        norm_a += left * left;
        norm_b += right * right;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Maximal Marginal Relevance selection.
///
/// Greedily picks up to `top_k` candidate indices maximizing
/// `lambda * sim(candidate, query) - (1 - lambda) * max_sim(candidate,
/// selected)`. The first pick carries no diversity penalty, and ties
/// resolve to the earliest-encountered candidate so repeated runs over
/// the same input select identically. Returned indices are in
/// selection order.
pub fn mmr_select(
    query_vector: &[f32],
    candidates: &[RetrievalCandidate],
    top_k: usize,
    lambda: f32,
) -> Vec<usize> {
    if candidates.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query_vector, &candidate.embedding))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(top_k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_position = 0usize;

        for (position, &candidate_index) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&chosen| {
                    cosine_similarity(
                        &candidates[candidate_index].embedding,
                        &candidates[chosen].embedding,
                    )
                })
                .fold(0f32, f32::max);

            let score = lambda * relevance[candidate_index] - (1.0 - lambda) * redundancy;
            // Strict comparison keeps the earliest candidate on ties.
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }

        selected.push(remaining.remove(best_position));
    }

    selected
}

/// Stateless retrieval pipeline: vectorize the query, over-fetch scoped
/// candidates, apply the hard similarity cutoff, diversify with MMR,
/// and project the winners into citable chunks.
pub struct Retriever<E, S> {
    embedder: E,
    store: S,
    options: RetrievalOptions,
}

impl<E, S> Retriever<E, S>
where
    E: Embedder,
    S: ChunkStore,
{
    pub fn new(embedder: E, store: S, options: RetrievalOptions) -> Result<Self, QueryError> {
        options.validate()?;
        Ok(Self {
            embedder,
            store,
            options,
        })
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Returns the best chunks for the query within the tenant scope,
    /// in selection order. An empty result means "no relevant
    /// context" and is not an error; store failures propagate.
    pub async fn retrieve(
        &self,
        query: &str,
        scope: QueryScope,
    ) -> Result<Vec<SourceChunk>, QueryError> {
        let query_vector = self.embedder.embed_one(query).await?;

        let fetched = self
            .store
            .nearest(scope, &query_vector, self.options.candidates_to_fetch())
            .await?;
        let fetched_count = fetched.len();

        let survivors: Vec<RetrievalCandidate> = fetched
            .into_iter()
            .filter(|candidate| candidate.similarity() >= self.options.min_similarity)
            .collect();

        debug!(
            customer_id = scope.customer_id,
            tag_id = scope.tag_id,
            fetched = fetched_count,
            above_threshold = survivors.len(),
            "retrieval candidates scoped and filtered"
        );

        if survivors.is_empty() {
            return Ok(Vec::new());
        }

        let selection = mmr_select(
            &query_vector,
            &survivors,
            self.options.top_k,
            self.options.mmr_lambda,
        );

        let mut by_index: Vec<Option<RetrievalCandidate>> =
            survivors.into_iter().map(Some).collect();

        Ok(selection
            .into_iter()
            .filter_map(|index| by_index[index].take())
            .map(RetrievalCandidate::into_source_chunk)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddingRecord;
    use crate::stores::InMemoryStore;
    use crate::{CharacterNgramEmbedder, Embedder};
    use async_trait::async_trait;
    use chrono::Utc;

    fn candidate(name: &str, embedding: Vec<f32>, distance: f32) -> RetrievalCandidate {
        RetrievalCandidate {
            source_filename: name.to_string(),
            parent_chunk_text: format!("{name} parent"),
            page_number: Some(1),
            section_title: None,
            embedding,
            distance,
        }
    }

    /// Test embedder with a fixed vocabulary of query vectors.
    #[derive(Clone)]
    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QueryError> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    fn record(
        customer_id: i64,
        tag_id: i64,
        name: &str,
        embedding: Vec<f32>,
    ) -> EmbeddingRecord {
        EmbeddingRecord {
            document_id: "doc".to_string(),
            source_filename: name.to_string(),
            chunk_text: format!("{name} chunk"),
            parent_chunk_text: format!("{name} parent"),
            embedding,
            customer_id,
            tag_id,
            page_number: Some(1),
            section_title: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cosine_similarity_of_identical_directions_is_one() {
        let sim = cosine_similarity(&[2.0, 0.0], &[4.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn mmr_first_pick_is_the_most_relevant() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            candidate("far", vec![0.0, 1.0], 1.0),
            candidate("near", vec![1.0, 0.0], 0.0),
        ];

        let selection = mmr_select(&query, &candidates, 1, 0.5);
        assert_eq!(selection, vec![1]);
    }

    #[test]
    fn mmr_prefers_diversity_over_near_duplicates() {
        // Two near-duplicates close to the query plus one distinct
        // candidate. Greedy top-2 by relevance would take both
        // duplicates; MMR must not: dup-b scores
        // 0.5*0.94 - 0.5*0.9995 < 0 while the distinct candidate
        // scores 0.5*0.6 - 0.5*0.32 > 0.
        let query = vec![1.0, 0.0];
        let candidates = vec![
            candidate("dup-a", vec![0.95, 0.31225], 0.05),
            candidate("dup-b", vec![0.94, 0.34117], 0.06),
            candidate("distinct", vec![0.6, -0.8], 0.4),
        ];

        let selection = mmr_select(&query, &candidates, 2, 0.5);

        assert_eq!(selection[0], 0);
        assert_eq!(selection[1], 2, "second pick must be the distinct candidate");
    }

    #[test]
    fn mmr_ties_select_the_earliest_candidate() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            candidate("first", vec![1.0, 0.0], 0.0),
            candidate("twin", vec![1.0, 0.0], 0.0),
        ];

        let selection = mmr_select(&query, &candidates, 1, 0.5);
        assert_eq!(selection, vec![0]);
    }

    #[test]
    fn mmr_stops_when_candidates_run_out() {
        let query = vec![1.0, 0.0];
        let candidates = vec![candidate("only", vec![1.0, 0.0], 0.0)];
        let selection = mmr_select(&query, &candidates, 5, 0.5);
        assert_eq!(selection.len(), 1);
    }

    #[test]
    fn lambda_one_reduces_to_pure_relevance_ranking() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            candidate("dup-a", vec![0.95, 0.31225], 0.05),
            candidate("dup-b", vec![0.94, 0.34117], 0.06),
            candidate("distinct", vec![0.6, -0.8], 0.4),
        ];

        let selection = mmr_select(&query, &candidates, 2, 1.0);
        assert_eq!(selection, vec![0, 1]);
    }

    #[tokio::test]
    async fn threshold_filter_is_a_hard_cutoff() {
        let store = InMemoryStore::new();
        store.ensure_schema(2).await.unwrap();
        // Similarities against the query [1, 0]: 0.9, 0.6, 0.3.
        let high = vec![0.9f32, (1.0f32 - 0.81).sqrt()];
        let mid = vec![0.6f32, 0.8f32];
        let low = vec![0.3f32, (1.0f32 - 0.09).sqrt()];
        store
            .bulk_insert(
                "doc",
                &[
                    record(1, 1, "high", high),
                    record(1, 1, "mid", mid),
                    record(1, 1, "low", low),
                ],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(
            FixedEmbedder {
                vector: vec![1.0, 0.0],
            },
            store,
            RetrievalOptions {
                top_k: 3,
                candidate_multiplier: 2,
                min_similarity: 0.5,
                mmr_lambda: 1.0,
            },
        )
        .unwrap();

        let chunks = retriever
            .retrieve("anything", QueryScope::new(1, 1))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        let names: Vec<&str> = chunks.iter().map(|c| c.source_filename.as_str()).collect();
        assert_eq!(names, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn retrieval_never_crosses_tenant_boundaries() {
        let store = InMemoryStore::new();
        store.ensure_schema(2).await.unwrap();
        store
            .bulk_insert("doc", &[record(1, 1, "mine", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .bulk_insert("doc", &[record(2, 9, "theirs", vec![1.0, 0.0])])
            .await
            .unwrap();

        let retriever = Retriever::new(
            FixedEmbedder {
                vector: vec![1.0, 0.0],
            },
            store,
            RetrievalOptions {
                min_similarity: 0.0,
                ..Default::default()
            },
        )
        .unwrap();

        let chunks = retriever
            .retrieve("anything", QueryScope::new(1, 1))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_filename, "mine");
    }

    #[tokio::test]
    async fn empty_scope_yields_explicit_empty_result() {
        let store = InMemoryStore::new();
        store.ensure_schema(2).await.unwrap();

        let retriever = Retriever::new(
            FixedEmbedder {
                vector: vec![1.0, 0.0],
            },
            store,
            RetrievalOptions::default(),
        )
        .unwrap();

        let chunks = retriever
            .retrieve("anything", QueryScope::new(5, 5))
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn repeated_retrieval_is_deterministic() {
        let store = InMemoryStore::new();
        store.ensure_schema(128).await.unwrap();

        let embedder = CharacterNgramEmbedder::default();
        let texts = [
            "vacation accrual and carryover rules",
            "expense reimbursement process",
            "vacation accrual policy details",
        ];
        let embeddings = embedder
            .embed_many(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let records: Vec<EmbeddingRecord> = texts
            .iter()
            .zip(embeddings)
            .map(|(text, embedding)| record(1, 1, text, embedding))
            .collect();
        store.bulk_insert("doc", &records).await.unwrap();

        let retriever = Retriever::new(
            embedder,
            store,
            RetrievalOptions {
                top_k: 2,
                candidate_multiplier: 2,
                min_similarity: 0.0,
                mmr_lambda: 0.5,
            },
        )
        .unwrap();

        let first = retriever
            .retrieve("how does vacation accrue", QueryScope::new(1, 1))
            .await
            .unwrap();
        let second = retriever
            .retrieve("how does vacation accrue", QueryScope::new(1, 1))
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn invalid_retrieval_options_are_rejected_at_construction() {
        let result = Retriever::new(
            FixedEmbedder {
                vector: vec![1.0, 0.0],
            },
            InMemoryStore::new(),
            RetrievalOptions {
                min_similarity: 1.5,
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(QueryError::InvalidConfig(_))));
    }
}
