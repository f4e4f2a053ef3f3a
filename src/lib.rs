//! PTC Agent - programmatic tool calling runtime
//!
//! A model solves a task by writing a Python or Go program instead of issuing
//! one structured tool call per turn. The program runs in a child process and
//! reaches the registered tools through a loopback HTTP server.
//!
//! # Modules
//!
//! - `tools` - Tool registry, wire protocol and the loopback tool server
//! - `executor` - Bridge generation and supervised execution of programs
//! - `model` - Chat model interface and the Ollama client
//! - `agent` - Code execution node and the generate/execute control loop
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ptc_agent::{AgentConfig, AgentController, FnTool, OllamaChat, ToolSet};
//! use tokio_util::sync::CancellationToken;
//!
//! let tools = ToolSet::new(vec![Arc::new(FnTool::constant("ping", "Replies pong", "pong"))])?;
//! let model = Arc::new(OllamaChat::new("http://localhost:11434", "qwen2.5-coder"));
//! let cancel = CancellationToken::new();
//!
//! let agent = AgentController::start(model, tools, AgentConfig::default(), &cancel).await?;
//! let run = agent.run_task(&cancel, "Call ping and report the reply").await?;
//! println!("{}", run.final_response);
//! agent.close(&cancel).await?;
//! ```

pub mod agent;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentError, AgentRun, ConversationState, PtcNode};
pub use executor::{CodeExecutor, ExecutionLanguage, ExecutionMode, ExecutionResult, ExecutorConfig};
pub use model::{ChatModel, Message, OllamaChat, Role};
pub use tools::{FnTool, Tool, ToolError, ToolServer, ToolSet};
