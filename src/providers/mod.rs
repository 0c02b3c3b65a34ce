//! Language-model completion service client.
//!
//! The correction loop only needs one-shot text completion over an ordered
//! list of role-tagged messages, so the trait surface is deliberately small.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Messages ─────────────────────────────────────────────────────

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Function name, set only on `function` turns recording an
    /// execution result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "function".into(),
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// Fixed sampling parameters for a completion call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub temperature: f64,
    /// Hard cap on response size; corrections want short answers.
    pub max_tokens: u32,
}

// ── Provider trait ───────────────────────────────────────────────

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// One-shot completion over an ordered message list. Returns the raw
    /// text of the first choice.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> anyhow::Result<String>;
}

// ── OpenAI-compatible implementation ─────────────────────────────

pub struct OpenAiCompatProvider {
    base_url: String,
    credential: Option<String>,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: &str, credential: Option<&str>, model: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential.map(ToString::to_string),
            model: model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> anyhow::Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                    name: m.name.as_deref(),
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("completion service returned {status}: {body}");
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("completion service returned no choices"))
    }
}

// ── Tests ────────────────────────────────────────────────────────
