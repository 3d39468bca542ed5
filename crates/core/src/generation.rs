use crate::error::QueryError;
use crate::models::GenerationParams;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Fixed phrase the generator must emit when the context cannot answer
/// the question; the assembler's fallback reuses it verbatim.
pub const UNANSWERABLE_PHRASE: &str = "The provided documents do not contain the relevant answer.";

const SYSTEM_PROMPT: &str = "\
You are a context-aware question-answering assistant. Your only source \
of information is the CONTEXT provided with each question.\n\
\n\
Constraints:\n\
1. Use only the provided CONTEXT; never external or prior knowledge.\n\
2. If the CONTEXT cannot answer the question, reply with exactly: \
\"The provided documents do not contain the relevant answer.\"\n\
3. Format answers in Markdown with a heading, and lists or tables \
where the data fits them.\n\
4. Never invent facts, figures, dates, or citations.";

const QUERY_TEMPLATE: &str = "\
### CONTEXT\n\
The following are the retrieved text chunks from the document base. \
Use this information and this information only.\n\
\n\
---\n\
||RETRIEVED_CONTEXT||\n\
---\n\
\n\
### USER QUERY\n\
||USER_QUESTION||\n\
\n\
### INSTRUCTION\n\
Answer strictly from the CONTEXT above, following the formatting rules \
in your system prompt.";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub query: String,
    pub context: String,
    pub sources: Vec<String>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// External answer-generation capability. Constructed once at process
/// start and shared by reference; failures are converted to the
/// fallback response at the assembler boundary, never here.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAnswer, QueryError>;
}

pub fn build_user_prompt(query: &str, context: &str) -> String {
    QUERY_TEMPLATE
        .replace("||RETRIEVED_CONTEXT||", context)
        .replace("||USER_QUESTION||", query)
}

/// Chat-completions client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatHttpGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl ChatHttpGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, QueryError> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)?;

        Ok(Self {
            client: Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[async_trait]
impl AnswerGenerator for ChatHttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAnswer, QueryError> {
        let user_prompt = build_user_prompt(&request.query, &request.context);
        let body = ChatRequest {
            model: &self.model,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
        };

        let mut http_request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await?;
        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "generator".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| QueryError::Request("generator response had no content".to_string()))?;

        let usage = parsed.usage;
        Ok(GeneratedAnswer {
            text,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: usage.and_then(|u| u.completion_tokens),
        })
    }
}
