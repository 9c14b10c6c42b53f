//! # OpenAI-compatible text generation
//!
//! [`OpenAiClient`] implements [`TextGenerator`] against `POST {base}/chat/completions`.
//! Construct it with [`OpenAiClient::new_from_env`] (`OPENAI_API_KEY`, optional
//! `OPENAI_BASE_URL`) or explicitly with [`OpenAiClient::new`] in tests.
//!
//! Status mapping: 401/403 become `Auth`, any other failure `Transport`, both attributed to
//! the organize stage. The organizer decides what a failed request means for the documents
//! involved.

use async_trait::async_trait;
use handbook_core::contract::{GenerationRequest, TextGenerator};
use handbook_core::{HandbookError, Result, Stage};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| HandbookError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn new_from_env() -> Result<Self> {
        let api_key = match env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                tracing::error!("OPENAI_API_KEY missing in environment");
                return Err(HandbookError::Auth {
                    stage: Stage::Organize,
                    target: "text generation service".into(),
                    message: "OPENAI_API_KEY is not set".into(),
                });
            }
        };
        let base_url = env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        tracing::info!(base_url = %base_url, "Initialized OpenAiClient from environment");
        Self::new(base_url, api_key)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let endpoint = self.endpoint();
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        tracing::debug!(model = %request.model, prompt_chars = request.prompt.len(), "Sending chat completion");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, endpoint = %endpoint, "Chat completion request failed");
                HandbookError::transport(Stage::Organize, &endpoint, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Chat completion returned an error status");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HandbookError::Auth {
                    stage: Stage::Organize,
                    target: endpoint,
                    message: format!("credential rejected with status {status}"),
                },
                _ => HandbookError::transport(
                    Stage::Organize,
                    endpoint,
                    format!("unexpected status {status}: {text}"),
                ),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| HandbookError::transport(Stage::Organize, &endpoint, e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                HandbookError::transport(Stage::Organize, endpoint, "response contained no message")
            })
    }
}
