use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::config::ChatConfig;

/// Model every request is sent to. Not user-configurable.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the history handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatOptions {
    pub model: String,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// A provider reply, normalized at the boundary.
///
/// Providers answer either with a structured `{message: {content}}` object or
/// with bare text. Everything past this type only ever sees `into_content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Structured { content: String },
    Raw(String),
}

impl Reply {
    /// Resolve a decoded response body into a reply.
    ///
    /// Accepts `{message: {content}}`, the OpenAI `{choices: [{message: {content}}]}`
    /// envelope, or a bare string. Objects and arrays without a content string
    /// (error envelopes, empty `choices`, tool-call replies) are malformed.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        let structured = value
            .pointer("/message/content")
            .or_else(|| value.pointer("/choices/0/message/content"))
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .map(str::to_owned);

        if let Some(content) = structured {
            return Ok(Reply::Structured { content });
        }

        match value {
            Value::Null => Err(ProviderError::Malformed("empty response body".to_string())),
            Value::String(text) => Ok(Reply::Raw(text)),
            other @ (Value::Object(_) | Value::Array(_)) => {
                Err(ProviderError::Malformed(format!("no reply content in {}", other)))
            }
            other => Ok(Reply::Raw(other.to_string())),
        }
    }

    pub fn into_content(self) -> String {
        match self {
            Reply::Structured { content } => content,
            Reply::Raw(text) => text,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
}

/// The conversational capability the chat core depends on.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn chat(&self, history: &[ChatMessage], options: &ChatOptions) -> Result<Reply, ProviderError>;
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiClient {
    api_key: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Returns `None` when no API key is configured, which leaves the
    /// provider unavailable rather than failing startup.
    pub fn from_config(config: &ChatConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        let endpoint = config.base_url.join("chat/completions")?;
        let client = reqwest::Client::new();

        Ok(Some(Self {
            api_key,
            endpoint,
            client,
        }))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AiProvider for OpenAiClient {
    async fn chat(&self, history: &[ChatMessage], options: &ChatOptions) -> Result<Reply, ProviderError> {
        let request_body = json!({
            "model": options.model,
            "messages": history,
        });

        debug!("Sending request to {}: {}", self.endpoint, request_body);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("API request failed with status {}: {}", status, body);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Received response: {}", body);

        // Some gateways answer with plain text instead of JSON.
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Reply::from_value(value),
            Err(_) => Ok(Reply::Raw(body)),
        }
    }
}
