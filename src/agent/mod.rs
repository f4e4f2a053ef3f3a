//! Agent loop for programmatic tool calling
//!
//! # Architecture
//!
//! ```text
//! User Task → AgentController ──► ChatModel.generate_content
//!                  ▲                        │
//!                  │              assistant message
//!                  │                        │
//!                  │            route_after_agent ── no code ──► Done
//!                  │                        │
//!                  │                   ```python / ```go
//!                  │                        ▼
//!                  │               PtcNode.invoke → CodeExecutor
//!                  │                        │
//!                  └─── [Code Execution Result | Error] (user message)
//! ```

pub mod controller;
pub mod extract;
pub mod node;
pub mod prompt;
pub mod state;

pub use controller::{
    route_after_agent, AgentConfig, AgentController, AgentError, AgentRun, Route, StateModifier,
    StopReason, MAX_ITERATIONS_MESSAGE,
};
pub use extract::{contains_code, extract_code};
pub use node::{ExecutionRecord, NodeError, PtcNode};
pub use prompt::build_system_prompt;
pub use state::ConversationState;
