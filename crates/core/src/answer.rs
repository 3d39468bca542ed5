use crate::generation::{AnswerGenerator, GenerationRequest};
use crate::models::{AnswerMetadata, AnswerResult, GenerationParams, SourceChunk};
use std::collections::HashSet;
use std::time::Instant;
use tracing::warn;

/// Presentation cap on cited sources; retrieval may have used more
/// chunks than are cited.
pub const MAX_CITED_SOURCES: usize = 3;

/// Visible separator between parent windows in the generator context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Fixed user-visible text for the degraded/no-context outcome.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant context was found in the selected documents to answer this question.";

const SOURCES_HEADING: &str = "\n\n### Sources\n";

/// Joins the parent windows in retrieval order into one context blob.
pub fn build_context(chunks: &[SourceChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.parent_chunk_text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Builds the capped citation list.
///
/// Deduplication keeps first-seen (retrieval) order so the cap always
/// selects the same three sources for the same retrieval; the
/// reference behavior used an unordered set here, which made the
/// citation list nondeterministic.
pub fn build_citations(chunks: &[SourceChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for chunk in chunks {
        let citation = citation_line(chunk);
        if seen.insert(citation.clone()) {
            citations.push(citation);
        }
        if citations.len() == MAX_CITED_SOURCES {
            break;
        }
    }

    citations
}

fn citation_line(chunk: &SourceChunk) -> String {
    let mut citation = match chunk.page_number {
        Some(page) => format!("Source: {} (Page {page})", chunk.source_filename),
        None => format!("Source: {}", chunk.source_filename),
    };
    if let Some(section) = &chunk.section_title {
        citation.push_str(&format!(" - Section: {section}"));
    }
    citation
}

fn fallback_result(duration_ms: u64) -> AnswerResult {
    AnswerResult {
        answer: NO_CONTEXT_ANSWER.to_string(),
        sources: Vec::new(),
        metadata: AnswerMetadata {
            model: "none".to_string(),
            duration_ms,
            prompt_tokens: None,
            completion_tokens: None,
        },
    }
}

/// Turns retrieved chunks into a cited answer, funnelling every
/// degraded outcome (no context, generator failure) into the one
/// fallback shape. Lower layers never fabricate answer text.
pub struct AnswerAssembler<G> {
    generator: G,
}

impl<G> AnswerAssembler<G>
where
    G: AnswerGenerator,
{
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub async fn answer(
        &self,
        query: &str,
        chunks: &[SourceChunk],
        params: &GenerationParams,
    ) -> AnswerResult {
        let started = Instant::now();

        if chunks.is_empty() {
            return fallback_result(elapsed_ms(started));
        }

        let context = build_context(chunks);
        let citations = build_citations(chunks);

        let request = GenerationRequest {
            query: query.to_string(),
            context,
            sources: citations.clone(),
            params: params.clone(),
        };

        match self.generator.generate(&request).await {
            Ok(generated) => {
                let answer = format!(
                    "{}{}{}",
                    generated.text,
                    SOURCES_HEADING,
                    citations.join("\n")
                );
                AnswerResult {
                    answer,
                    sources: citations,
                    metadata: AnswerMetadata {
                        model: generated.model,
                        duration_ms: elapsed_ms(started),
                        prompt_tokens: generated.prompt_tokens,
                        completion_tokens: generated.completion_tokens,
                    },
                }
            }
            Err(error) => {
                warn!(%error, "answer generation failed, returning fallback");
                fallback_result(elapsed_ms(started))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::generation::GeneratedAnswer;
    use async_trait::async_trait;

    struct FakeGenerator {
        reply: Option<String>,
    }

    #[async_trait]
    impl AnswerGenerator for FakeGenerator {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GeneratedAnswer, QueryError> {
            match &self.reply {
                Some(text) => Ok(GeneratedAnswer {
                    text: text.clone(),
                    model: "fake-model".to_string(),
                    prompt_tokens: Some(100),
                    completion_tokens: Some(20),
                }),
                None => Err(QueryError::Request("generator offline".to_string())),
            }
        }
    }

    fn chunk(filename: &str, page: u32, section: Option<&str>) -> SourceChunk {
        SourceChunk {
            source_filename: filename.to_string(),
            parent_chunk_text: format!("{filename} page {page} parent text"),
            page_number: Some(page),
            section_title: section.map(str::to_string),
        }
    }

    #[test]
    fn context_joins_windows_in_retrieval_order() {
        let chunks = vec![chunk("a.pdf", 1, None), chunk("b.pdf", 2, None)];
        let context = build_context(&chunks);
        assert_eq!(
            context,
            "a.pdf page 1 parent text\n---\nb.pdf page 2 parent text"
        );
    }

    #[test]
    fn citations_include_page_and_optional_section() {
        let with_section = citation_line(&chunk("guide.pdf", 4, Some("2.1 Leave")));
        assert_eq!(with_section, "Source: guide.pdf (Page 4) - Section: 2.1 Leave");

        let without_section = citation_line(&chunk("guide.pdf", 4, None));
        assert_eq!(without_section, "Source: guide.pdf (Page 4)");
    }

    #[test]
    fn citations_are_capped_at_three() {
        let chunks: Vec<SourceChunk> = (1..=5)
            .map(|i| chunk(&format!("doc-{i}.pdf"), i, None))
            .collect();

        let citations = build_citations(&chunks);
        assert_eq!(citations.len(), MAX_CITED_SOURCES);
    }

    #[test]
    fn citation_dedup_keeps_first_seen_order() {
        let chunks = vec![
            chunk("b.pdf", 2, None),
            chunk("a.pdf", 1, None),
            chunk("b.pdf", 2, None),
            chunk("c.pdf", 3, None),
        ];

        let citations = build_citations(&chunks);
        assert_eq!(
            citations,
            vec![
                "Source: b.pdf (Page 2)".to_string(),
                "Source: a.pdf (Page 1)".to_string(),
                "Source: c.pdf (Page 3)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn generated_answer_carries_sources_section() {
        let assembler = AnswerAssembler::new(FakeGenerator {
            reply: Some("# Answer\nFifteen days per year.".to_string()),
        });

        let result = assembler
            .answer(
                "how many vacation days?",
                &[chunk("handbook.pdf", 7, Some("Leave"))],
                &GenerationParams::default(),
            )
            .await;

        assert!(result.answer.starts_with("# Answer"));
        assert!(result.answer.contains("### Sources"));
        assert!(result
            .answer
            .contains("Source: handbook.pdf (Page 7) - Section: Leave"));
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.metadata.model, "fake-model");
        assert_eq!(result.metadata.completion_tokens, Some(20));
    }

    #[tokio::test]
    async fn empty_retrieval_yields_the_fixed_fallback() {
        let assembler = AnswerAssembler::new(FakeGenerator {
            reply: Some("should never be called".to_string()),
        });

        let result = assembler
            .answer("anything", &[], &GenerationParams::default())
            .await;

        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert!(result.sources.is_empty());
        assert_eq!(result.metadata.model, "none");
    }

    #[tokio::test]
    async fn generator_failure_degrades_to_the_same_fallback_shape() {
        let assembler = AnswerAssembler::new(FakeGenerator { reply: None });

        let result = assembler
            .answer(
                "anything",
                &[chunk("handbook.pdf", 1, None)],
                &GenerationParams::default(),
            )
            .await;

        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert!(result.sources.is_empty());
    }
}
