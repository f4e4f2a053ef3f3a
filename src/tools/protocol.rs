//! Wire protocol between generated programs and the tool server
//!
//! Request:
//! ```json
//! {"tool_name": "calculator", "input": "2 + 2"}
//! ```
//!
//! Responses carry an explicit `success` flag, so the outcome is readable from
//! the body alone regardless of HTTP status:
//! ```json
//! {"success": true,  "result": "4",             "tool": "calculator", "input": "2 + 2"}
//! {"success": false, "error": "tool not found", "tool": "calculator", "input": "2 + 2"}
//! ```

use serde::{Deserialize, Serialize};

/// Path of the invocation endpoint, relative to the server base URL
pub const CALL_PATH: &str = "/call";

/// A single tool invocation issued by the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub input: String,
}

/// Response to a [`ToolRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub tool: String,
    pub input: String,
}

impl ToolResponse {
    pub fn ok(tool: impl Into<String>, input: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error: None,
            tool: tool.into(),
            input: input.into(),
        }
    }

    pub fn failure(
        tool: impl Into<String>,
        input: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            tool: tool.into(),
            input: input.into(),
        }
    }
}

/// Entry of the `GET /tools` catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}
