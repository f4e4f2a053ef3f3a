//! Code execution node
//!
//! Takes the latest assistant message, runs the code it carries and appends
//! the outcome as a user message. Execution failures are folded into the
//! conversation so the model can react to them; only a malformed state or a
//! message with nothing to run is an error.

use std::fmt;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::extract::extract_code;
use super::state::ConversationState;
use crate::executor::{CodeExecutor, ExecutionLanguage, ExecutionResult};
use crate::model::{Message, Role};
use crate::tools::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The state cannot be executed (no messages, or last one not from the assistant)
    InvalidState(String),
    /// The assistant message carries nothing runnable
    NoCodeFound,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            NodeError::NoCodeFound => write!(f, "no code found in message"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Record of a single code execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub language: ExecutionLanguage,
    pub code: String,
    /// Captured output; partial when the run failed
    pub result: ExecutionResult,
    /// Failure description, `None` on success
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Graph node that executes model-written code
#[derive(Debug)]
pub struct PtcNode {
    executor: CodeExecutor,
}

impl PtcNode {
    pub fn new(executor: CodeExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &CodeExecutor {
        &self.executor
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), ServerError> {
        self.executor.start(cancel).await
    }

    /// Execute the code in the last assistant message and append the outcome
    pub async fn invoke(
        &self,
        cancel: &CancellationToken,
        state: &mut ConversationState,
    ) -> Result<ExecutionRecord, NodeError> {
        let last = state
            .last()
            .ok_or_else(|| NodeError::InvalidState("no messages in state".to_string()))?;
        if last.role != Role::Assistant {
            return Err(NodeError::InvalidState(format!(
                "last message must be from the assistant, found {}",
                last.role.as_str()
            )));
        }

        let code = extract_code(last).ok_or(NodeError::NoCodeFound)?;
        let language = self.executor.language();

        let record = match self.executor.execute(cancel, &code).await {
            Ok(result) => {
                info!(
                    %language,
                    duration_ms = result.duration_ms,
                    output_len = result.output.len(),
                    "Code execution succeeded"
                );
                state.push(Message::user(format!(
                    "[Code Execution Result]\n{}",
                    result.output
                )));
                ExecutionRecord {
                    language,
                    code,
                    result,
                    error: None,
                }
            }
            Err(e) => {
                warn!(%language, error = %e, kind = e.kind(), "Code execution failed");
                let partial = e.partial().cloned().unwrap_or_default();
                state.push(Message::user(format!(
                    "[Code Execution Error]\n{}\n\nOutput:\n{}",
                    e, partial.output
                )));
                ExecutionRecord {
                    language,
                    code,
                    result: partial,
                    error: Some(e.to_string()),
                }
            }
        };

        Ok(record)
    }

    /// Stop the executor's tool server; safe to call when never started
    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), ServerError> {
        self.executor.stop(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::tools::{FnTool, Tool, ToolSet};
    use std::sync::Arc;

    fn node() -> PtcNode {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FnTool::constant("ping", "Replies pong", "pong"))];
        let executor = CodeExecutor::new(
            ToolSet::new(tools).unwrap(),
            ExecutorConfig {
                python_command: "ptc-no-such-python".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        PtcNode::new(executor)
    }

    #[tokio::test]
    async fn test_empty_state_is_invalid() {
        let mut state = ConversationState::default();
        let err = node()
            .invoke(&CancellationToken::new(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_last_message_must_be_assistant() {
        let mut state = ConversationState::from_task("hello");
        let err = node()
            .invoke(&CancellationToken::new(), &mut state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("assistant"));
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_message_has_no_code() {
        let mut state = ConversationState::from_task("hello");
        state.push(Message::assistant("  \n"));
        let err = node()
            .invoke(&CancellationToken::new(), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::NoCodeFound);
    }

    #[tokio::test]
    async fn test_failure_is_folded_into_conversation() {
        let node = node();
        let cancel = CancellationToken::new();
        node.start(&cancel).await.unwrap();

        let mut state = ConversationState::from_task("hello");
        state.push(Message::assistant("```python\nprint(ping())\n```"));
        let record = node.invoke(&cancel, &mut state).await.unwrap();

        assert!(!record.succeeded());
        assert_eq!(record.code, "print(ping())\n");
        let last = state.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().starts_with("[Code Execution Error]\nfailed to launch ptc-no-such-python"));
        assert!(last.text().ends_with("\n\nOutput:\n"));

        node.close(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_start() {
        node().close(&CancellationToken::new()).await.unwrap();
    }
}
