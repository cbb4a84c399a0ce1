//! Chat-completion model seam and its OpenAI implementation.
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::openai::{ApiError, OpenAiClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Anything that can turn a message list into a reply.
pub trait ChatModel {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ApiError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/v1/chat/completions` client.
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: Secret<String>, base_url: &str, model: &str) -> Self {
        Self {
            client: OpenAiClient::new(api_key, base_url),
            model: model.to_string(),
        }
    }

    /// Builds the client from configuration; fails with
    /// `ConfigError::MissingApiKey` when no key is set.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = Secret::new(config.require_api_key()?.expose_secret().clone());
        Ok(Self::new(
            api_key,
            &config.openai.base_url,
            &config.openai.chat_model,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatModel for OpenAiChat {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        debug!(
            "Requesting completion from {} ({} messages)",
            self.model,
            messages.len()
        );

        let request = CompletionRequest {
            model: &self.model,
            messages,
        };
        let response: CompletionResponse = self.client.post_json("chat/completions", &request)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::InvalidResponse("completion has no content".to_string()))
    }
}
