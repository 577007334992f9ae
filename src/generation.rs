use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::semantic::{classify_http_error, classify_status};

/// Prompt → text. Grounding rules live in the prompt, not in implementations.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing chat model name");

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build generation HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.trim().to_string(),
            temperature: 0.0,
            max_tokens: 500,
        })
    }
}

impl Generator for OpenAiGenerator {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You answer questions strictly from the supplied document context.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(classify_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CollaboratorError::Fatal(format!("malformed chat response: {err}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
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
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
