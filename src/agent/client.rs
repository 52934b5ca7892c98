//! Chat-completion client shared by the planner, decider and summarizer.
//!
//! Speaks the OpenAI-compatible `/chat/completions` API (OpenAI, Gemini,
//! OpenRouter, LM Studio, Ollama) and the Anthropic `/messages` API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{AgentFuture, TokenUsage};
use crate::config::{LlmConfig, LlmProvider};
use crate::{AppError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions.
    System,
    /// Caller input.
    User,
    /// Model output.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text returned by one chat call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Response text; empty when the model returned nothing.
    pub content: String,
    /// Tokens spent.
    pub usage: TokenUsage,
}

/// Anything that can answer a chat request.
pub trait ChatModel: Send + Sync {
    /// Send `messages` and return the reply.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Llm` on transport or HTTP failure.
    fn chat<'a>(&'a self, messages: &'a [ChatMessage], max_tokens: u32)
        -> AgentFuture<'a, ChatReply>;
}

/// Shared handle to a chat model.
pub type SharedChatModel = Arc<dyn ChatModel>;

/// HTTP chat client for one provider and model.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// Build a client from configuration, reading the provider's API key from
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the provider needs a key and none is set,
    /// or `AppError::Llm` if the HTTP client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = match config.provider.api_key_env() {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    return Err(AppError::Config(format!(
                        "{var} must be set for llm provider {:?}",
                        config.provider
                    )))
                }
            },
            None => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let (name, value) = match config.provider {
                LlmProvider::Anthropic => (HeaderName::from_static("x-api-key"), key),
                _ => (AUTHORIZATION, format!("Bearer {key}")),
            };
            let mut value = HeaderValue::from_str(&value)
                .map_err(|_| AppError::Config("api key contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }
        if config.provider == LlmProvider::Anthropic {
            headers.insert(
                "anthropic-version",
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            provider: config.provider,
            base_url: config.base_url().to_owned(),
            model: config.model().to_owned(),
        })
    }

    /// Model name sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            return Err(AppError::Llm(format!(
                "{url} returned {}: {snippet}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }

    async fn chat_openai(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<ChatReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        let parsed: OpenAiResponse = self.send(&url, &body).await?.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        Ok(ChatReply { content, usage })
    }

    async fn chat_anthropic(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<ChatReply> {
        let url = format!("{}/messages", self.base_url);
        // System text is a top-level field; the rest go in `messages`.
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let rest: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": rest,
        });
        let parsed: AnthropicResponse = self.send(&url, &body).await?.json().await?;
        let content = parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default();
        Ok(ChatReply {
            content,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
            },
        })
    }
}

impl ChatModel for LlmClient {
    fn chat<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        max_tokens: u32,
    ) -> AgentFuture<'a, ChatReply> {
        Box::pin(async move {
            let reply = match self.provider {
                LlmProvider::Anthropic => self.chat_anthropic(messages, max_tokens).await?,
                _ => self.chat_openai(messages, max_tokens).await?,
            };
            debug!(
                model = %self.model,
                prompt_tokens = reply.usage.prompt_tokens,
                completion_tokens = reply.usage.completion_tokens,
                "chat completed"
            );
            Ok(reply)
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
