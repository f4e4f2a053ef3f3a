//! Chat model interface
//!
//! The agent loop only needs "messages in, choices out". [`ChatModel`] is that
//! seam; [`ollama::OllamaChat`] is the bundled implementation and tests plug
//! in scripted models.

pub mod ollama;
pub mod types;

use async_trait::async_trait;

pub use ollama::OllamaChat;
pub use types::{Message, Part, Role, ToolCall, ToolResult};

/// Per-call generation settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

/// One candidate completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Choice {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Choice {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub choices: Vec<Choice>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice::text(content)],
        }
    }
}

/// Error type for chat operations
#[derive(Debug)]
pub enum ChatError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    EmptyResponse,
    /// Non-success status or error body from the provider
    Api(String),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Request(e) => write!(f, "Request error: {}", e),
            ChatError::Parse(e) => write!(f, "Parse error: {}", e),
            ChatError::EmptyResponse => write!(f, "Empty response from model"),
            ChatError::Api(msg) => write!(f, "API error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::Request(e) => Some(e),
            ChatError::Parse(e) => Some(e),
            ChatError::EmptyResponse | ChatError::Api(_) => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Request(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Parse(e)
    }
}

/// A language model that continues a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier used in logs and metrics
    fn model_name(&self) -> &str;

    async fn generate_content(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ChatError>;
}
