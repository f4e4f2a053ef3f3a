//! Agent Controller - the generate / execute control loop
//!
//! The controller alternates between asking the model for the next message
//! and running any code that message carries, until the model answers
//! without code or the iteration ceiling is reached.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::extract::contains_code;
use super::node::{ExecutionRecord, NodeError, PtcNode};
use super::prompt::build_system_prompt;
use super::state::ConversationState;
use crate::executor::{CodeExecutor, ExecutionLanguage, ExecutionMode, ExecutorConfig};
use crate::metrics::{AGENT_ITERATIONS, AGENT_TASKS, LLM_CALL_TIME};
use crate::model::{ChatError, ChatModel, GenerateOptions, Message, Part, Role};
use crate::tools::{ServerError, ToolSet};

/// Assistant message appended when the iteration ceiling is hit
pub const MAX_ITERATIONS_MESSAGE: &str = "Maximum iterations reached. Please try a simpler query.";

/// Rewrites the outgoing message list right before each model call
pub type StateModifier = Arc<dyn Fn(Vec<Message>) -> Vec<Message> + Send + Sync>;

/// Configuration for the agent controller
#[derive(Clone)]
pub struct AgentConfig {
    /// Model name (e.g., "qwen2.5-coder")
    pub model: String,
    pub language: ExecutionLanguage,
    pub mode: ExecutionMode,
    /// Maximum number of model calls per run
    pub max_iterations: usize,
    /// Timeout for one code execution in seconds
    pub execution_timeout_secs: u64,
    /// Prepended to the generated system prompt
    pub system_prompt: Option<String>,
    /// Applied to a copy of the history before each model call
    pub state_modifier: Option<StateModifier>,
    /// Grace period for tool server shutdown in milliseconds
    pub shutdown_timeout_ms: u64,
    pub generate_options: GenerateOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder".to_string(),
            language: ExecutionLanguage::Python,
            mode: ExecutionMode::Server,
            max_iterations: 10,
            execution_timeout_secs: 30,
            system_prompt: None,
            state_modifier: None,
            shutdown_timeout_ms: 5000,
            generate_options: GenerateOptions::default(),
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("mode", &self.mode)
            .field("max_iterations", &self.max_iterations)
            .field("execution_timeout_secs", &self.execution_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .field("state_modifier", &self.state_modifier.as_ref().map(|_| "<fn>"))
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .field("generate_options", &self.generate_options)
            .finish()
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(AgentError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.execution_timeout_secs == 0 {
            return Err(AgentError::Config(
                "execution_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Executor settings derived from this config
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            language: self.language,
            mode: self.mode,
            timeout: Duration::from_secs(self.execution_timeout_secs),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ..ExecutorConfig::default()
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without code
    Completed,
    /// The iteration ceiling was reached
    MaxIterations,
}

impl StopReason {
    fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxIterations => "max_iterations",
        }
    }
}

/// Result of an agent run
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Full conversation, system message included
    pub state: ConversationState,
    /// Text of the last assistant message
    pub final_response: String,
    /// Number of model calls made
    pub iterations: usize,
    pub executions: Vec<ExecutionRecord>,
    /// Unique trace ID for this run
    pub trace_id: String,
    pub stop_reason: StopReason,
}

/// Next step after the agent node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    End,
}

/// Error type for agent operations
#[derive(Debug)]
pub enum AgentError {
    /// Model call failed
    Model(ChatError),
    /// The model returned no content
    EmptyResponse,
    Node(NodeError),
    Server(ServerError),
    Config(String),
    Cancelled,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Model(e) => write!(f, "failed to generate content: {}", e),
            AgentError::EmptyResponse => write!(f, "empty response from model"),
            AgentError::Node(e) => write!(f, "code execution node: {}", e),
            AgentError::Server(e) => write!(f, "tool server: {}", e),
            AgentError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            AgentError::Cancelled => write!(f, "agent run cancelled"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Model(e) => Some(e),
            AgentError::Node(e) => Some(e),
            AgentError::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ChatError> for AgentError {
    fn from(e: ChatError) -> Self {
        AgentError::Model(e)
    }
}

impl From<NodeError> for AgentError {
    fn from(e: NodeError) -> Self {
        AgentError::Node(e)
    }
}

impl From<ServerError> for AgentError {
    fn from(e: ServerError) -> Self {
        AgentError::Server(e)
    }
}

/// Routing predicate: execute when the last assistant message carries code
pub fn route_after_agent(state: &ConversationState) -> Route {
    match state.last() {
        Some(last) if last.role == Role::Assistant && contains_code(last) => Route::Execute,
        _ => Route::End,
    }
}

/// Agent Controller orchestrating the model and code execution
pub struct AgentController {
    model: Arc<dyn ChatModel>,
    node: PtcNode,
    config: AgentConfig,
    system_prompt: String,
}

impl AgentController {
    /// Validate the configuration and start the tool server
    ///
    /// # Arguments
    /// * `model` - Chat model generating code and answers
    /// * `tools` - Tools callable from generated code (at least one)
    /// * `config` - Agent configuration
    pub async fn start(
        model: Arc<dyn ChatModel>,
        tools: ToolSet,
        config: AgentConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        if tools.is_empty() {
            return Err(AgentError::Config(
                "at least one tool is required".to_string(),
            ));
        }

        let executor =
            CodeExecutor::new(tools, config.executor_config()).map_err(AgentError::Config)?;
        let node = PtcNode::new(executor);
        node.start(cancel).await?;

        let system_prompt = build_system_prompt(
            config.system_prompt.as_deref(),
            config.language,
            &node.executor().tool_definitions(),
        );

        info!(
            model = %model.model_name(),
            language = %config.language,
            tools = node.executor().tools().len(),
            base_url = %node.executor().server().base_url(),
            "Agent controller started"
        );

        Ok(Self {
            model,
            node,
            config,
            system_prompt,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn node(&self) -> &PtcNode {
        &self.node
    }

    /// One generation step
    ///
    /// Appends either the model's reply or, once the ceiling is reached, the
    /// fixed advisory message. The system prompt is inserted into the state
    /// on the first call.
    pub async fn agent_node(
        &self,
        cancel: &CancellationToken,
        state: &mut ConversationState,
    ) -> Result<(), AgentError> {
        if state.iteration_count >= self.config.max_iterations {
            warn!(
                iterations = state.iteration_count,
                max = self.config.max_iterations,
                "Max iterations reached"
            );
            state.push(Message::assistant(MAX_ITERATIONS_MESSAGE));
            return Ok(());
        }

        state.iteration_count += 1;
        state.ensure_system(&self.system_prompt);

        let mut outgoing = state.messages.clone();
        if let Some(modifier) = &self.config.state_modifier {
            outgoing = modifier(outgoing);
        }

        let model_name = self.model.model_name().to_string();
        let llm_span = info_span!(
            "llm_call",
            iteration = state.iteration_count,
            model = %model_name,
            otel.name = "llm_call"
        );

        let call_start = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            r = self
                .model
                .generate_content(&outgoing, &self.config.generate_options)
                .instrument(llm_span) => r?,
        };
        let elapsed = call_start.elapsed();
        LLM_CALL_TIME
            .with_label_values(&[&model_name])
            .observe(elapsed.as_secs_f64());

        let mut parts = Vec::new();
        for choice in response.choices {
            if !choice.content.is_empty() {
                parts.push(Part::text(choice.content));
            }
            parts.extend(choice.tool_calls.into_iter().map(Part::ToolCall));
        }
        if parts.is_empty() {
            return Err(AgentError::EmptyResponse);
        }

        debug!(
            iteration = state.iteration_count,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            parts = parts.len(),
            "Model replied"
        );
        state.push(Message::with_parts(Role::Assistant, parts));
        Ok(())
    }

    /// Drive the loop to completion on an existing state
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        mut state: ConversationState,
    ) -> Result<AgentRun, AgentError> {
        let trace_id = Uuid::now_v7().to_string();
        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            model = %self.model.model_name(),
            language = %self.config.language,
            otel.name = "agent_task"
        );

        let outcome = async {
            info!(trace_id = %trace_id, "Starting agent task");
            let mut executions = Vec::new();

            let stop_reason = loop {
                if cancel.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let at_ceiling = state.iteration_count >= self.config.max_iterations;
                self.agent_node(cancel, &mut state).await?;
                if at_ceiling {
                    break StopReason::MaxIterations;
                }

                match route_after_agent(&state) {
                    Route::End => break StopReason::Completed,
                    Route::Execute => {}
                }

                match self.node.invoke(cancel, &mut state).await {
                    Ok(record) => executions.push(record),
                    Err(NodeError::NoCodeFound) => break StopReason::Completed,
                    Err(e) => return Err(e.into()),
                }
            };

            Ok::<_, AgentError>((executions, stop_reason))
        }
        .instrument(root_span)
        .await;

        match outcome {
            Ok((executions, stop_reason)) => {
                info!(
                    trace_id = %trace_id,
                    iterations = state.iteration_count,
                    executions = executions.len(),
                    stop_reason = stop_reason.as_str(),
                    "Agent task finished"
                );
                AGENT_TASKS.with_label_values(&[stop_reason.as_str()]).inc();
                AGENT_ITERATIONS.observe(state.iteration_count as f64);

                Ok(AgentRun {
                    final_response: state.last_assistant_text().unwrap_or_default(),
                    iterations: state.iteration_count,
                    executions,
                    trace_id,
                    stop_reason,
                    state,
                })
            }
            Err(e) => {
                let status = match e {
                    AgentError::Cancelled => "cancelled",
                    _ => "error",
                };
                warn!(trace_id = %trace_id, error = %e, "Agent task failed");
                AGENT_TASKS.with_label_values(&[status]).inc();
                Err(e)
            }
        }
    }

    /// Run a single user task from a fresh conversation
    pub async fn run_task(
        &self,
        cancel: &CancellationToken,
        task: &str,
    ) -> Result<AgentRun, AgentError> {
        self.run(cancel, ConversationState::from_task(task)).await
    }

    /// Stop the tool server
    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        self.node.close(cancel).await?;
        Ok(())
    }
}
