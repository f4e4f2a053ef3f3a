//! Ollama `/api/chat` client
//!
//! Non-streaming chat requests at temperature 0 unless overridden. Native
//! tool schemas can be attached for models that support them; returned
//! `tool_calls` become [`Part::ToolCall`] entries on the choice.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Message, Part, Role, ToolCall};
use super::{ChatError, ChatModel, Choice, GenerateOptions, ModelResponse};

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// A message on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Native tool definition
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    /// JSON Schema
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// Function taking a single string `input`
    pub fn string_input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "input": {"type": "string", "description": "Tool input"}
                    },
                    "required": ["input"]
                }),
            },
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`ChatModel`] backed by an Ollama server
#[derive(Clone)]
pub struct OllamaChat {
    base_url: String,
    model: String,
    tools: Vec<ToolSchema>,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            tools: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Advertise native tool schemas on every request
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the JSON body for one request
    pub fn request_body(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<serde_json::Value, ChatError> {
        let wire: Vec<ChatMessage> = messages.iter().flat_map(to_wire).collect();

        let mut model_options = serde_json::json!({
            "temperature": options.temperature.unwrap_or(0.0),
        });
        if let Some(max) = options.max_tokens {
            model_options["num_predict"] = serde_json::json!(max);
        }
        if !options.stop.is_empty() {
            model_options["stop"] = serde_json::to_value(&options.stop)?;
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire,
            "stream": false,
            "options": model_options,
        });
        if !self.tools.is_empty() {
            body["tools"] = serde_json::to_value(&self.tools)?;
        }
        Ok(body)
    }
}

impl std::fmt::Debug for OllamaChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaChat")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Tool results travel as separate `tool` messages
fn to_wire(message: &Message) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    let mut text = Vec::new();
    let mut calls = Vec::new();

    for part in &message.parts {
        match part {
            Part::Text { text: t } => text.push(t.as_str()),
            Part::ToolCall(call) => calls.push(WireToolCall {
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            }),
            Part::ToolResult(result) => out.push(ChatMessage {
                role: Role::Tool.as_str().to_string(),
                content: result.content.clone(),
                tool_calls: None,
            }),
        }
    }

    if !text.is_empty() || !calls.is_empty() || out.is_empty() {
        out.insert(
            0,
            ChatMessage {
                role: message.role.as_str().to_string(),
                content: text.join("\n"),
                tool_calls: if calls.is_empty() { None } else { Some(calls) },
            },
        );
    }
    out
}

/// Convert a raw response body into a [`ModelResponse`]
pub fn parse_response(text: &str) -> Result<ModelResponse, ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyResponse);
    }
    let response: ChatResponse = serde_json::from_str(text)?;
    let tool_calls = response
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    Ok(ModelResponse {
        choices: vec![Choice {
            content: response.message.content,
            tool_calls,
        }],
    })
}

#[async_trait::async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_content(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = self.request_body(messages, options)?;

        debug!(model = %self.model, messages = messages.len(), "Sending chat request");
        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(ChatError::Api(format!("{}: {}", status, message)));
        }

        parse_response(&text)
    }
}
