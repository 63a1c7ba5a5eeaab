//! Text generation providers.
//!
//! - **[`AnthropicGenerator`]** — `POST /v1/messages` with the system prompt
//!   in the top-level `system` field.
//! - **[`OpenAIGenerator`]** — `POST /v1/chat/completions` with a system and a
//!   user message.
//!
//! Responses are decoded into the provider's own schema and converted to a
//! [`GenerationResponse`]. Picking the answer text out of the segments is the
//! pipeline's job, not the provider's.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vignette_rag_core::pipeline::{GenerationProvider, GenerationResponse, ResponseSegment};
use vignette_rag_core::prompt::Prompt;
use vignette_rag_core::ServiceError;

use crate::config::{Credentials, GenerationConfig};
use crate::retry::{send_json, with_retry, RetryPolicy};

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
struct Sampling {
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl Sampling {
    fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

// ============ Anthropic ============

pub struct AnthropicGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sampling: Sampling,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [AnthropicMessage<'a>; 1],
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_URL.to_string()),
            api_key: credentials.anthropic()?.trim().to_string(),
            sampling: Sampling::from_config(config),
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

fn anthropic_segments(response: AnthropicResponse) -> Result<GenerationResponse, ServiceError> {
    let mut segments = Vec::with_capacity(response.content.len());
    for block in response.content {
        segments.push(match block.text {
            Some(text) if block.kind == "text" => ResponseSegment::Text { text },
            None if block.kind == "text" => {
                return Err(ServiceError::malformed(
                    "anthropic",
                    "text block without a text field",
                ))
            }
            _ => ResponseSegment::Other { kind: block.kind },
        });
    }
    Ok(GenerationResponse { segments })
}

#[async_trait]
impl GenerationProvider for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.sampling.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<GenerationResponse, ServiceError> {
        let body = AnthropicRequest {
            model: &self.sampling.model,
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            system: &prompt.system,
            messages: [AnthropicMessage {
                role: "user",
                content: &prompt.user,
            }],
        };
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let response: AnthropicResponse = with_retry(&self.retry, || {
            send_json(
                "anthropic",
                self.client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body),
            )
        })
        .await?;
        anthropic_segments(response)
    }
}

// ============ OpenAI ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sampling: Sampling,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<serde_json::Value>,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key: credentials.openai()?.to_string(),
            sampling: Sampling::from_config(config),
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

fn chat_segments(response: ChatResponse) -> GenerationResponse {
    let segments = response
        .choices
        .into_iter()
        .take(1)
        .flat_map(|choice| {
            let mut out = Vec::new();
            if let Some(text) = choice.message.content {
                out.push(ResponseSegment::Text { text });
            }
            if choice.message.tool_calls.is_some() {
                out.push(ResponseSegment::Other {
                    kind: "tool_calls".to_string(),
                });
            }
            out
        })
        .collect();
    GenerationResponse { segments }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.sampling.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<GenerationResponse, ServiceError> {
        let body = ChatRequest {
            model: &self.sampling.model,
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response: ChatResponse = with_retry(&self.retry, || {
            send_json(
                "openai-chat",
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body),
            )
        })
        .await?;
        Ok(chat_segments(response))
    }
}

/// Create the [`GenerationProvider`] named by `provider` in `config`.
pub fn create_generator(
    config: &GenerationConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config, credentials)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config, credentials)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_blocks_to_segments() {
        let json = r#"{
            "id": "msg_1",
            "type": "message",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Give IV alteplase within 4.5 hours."}
            ],
            "stop_reason": "end_turn"
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(json).unwrap();
        let r = anthropic_segments(parsed).unwrap();
        assert_eq!(
            r.segments[0],
            ResponseSegment::Other {
                kind: "thinking".into()
            }
        );
        assert_eq!(r.first_text(), Some("Give IV alteplase within 4.5 hours."));
    }

    #[test]
    fn test_anthropic_text_block_without_text_is_malformed() {
        let parsed: AnthropicResponse =
            serde_json::from_str(r#"{"content":[{"type":"text"}]}"#).unwrap();
        assert!(matches!(
            anthropic_segments(parsed),
            Err(ServiceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_anthropic_missing_content_fails_to_decode() {
        assert!(serde_json::from_str::<AnthropicResponse>(r#"{"type":"message"}"#).is_err());
    }

    #[test]
    fn test_chat_null_content_has_no_text() {
        let json = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":null,"tool_calls":[{"id":"x"}]}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        let r = chat_segments(parsed);
        assert_eq!(r.first_text(), None);
        assert_eq!(r.segments.len(), 1);
    }

    #[test]
    fn test_chat_text() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":" Yes. "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(chat_segments(parsed).first_text(), Some("Yes."));
    }

    #[test]
    fn test_requires_matching_key() {
        let config = GenerationConfig::default();
        let err = create_generator(&config, &Credentials::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
