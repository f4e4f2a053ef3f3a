//! Integration tests for the agent loop
//!
//! A scripted chat model stands in for the LLM. Tests that run generated
//! code need `python3` on PATH and skip themselves otherwise; the live
//! Ollama test is marked #[ignore].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ptc_agent::agent::{
    AgentConfig, AgentController, AgentError, ConversationState, StopReason,
    MAX_ITERATIONS_MESSAGE,
};
use ptc_agent::executor::{command_available, CodeExecutor, ExecutionError, ExecutorConfig};
use ptc_agent::model::{ChatError, ChatModel, Choice, GenerateOptions, Message, ModelResponse, Role};
use ptc_agent::tools::{FnTool, Tool, ToolError, ToolSet};

/// Chat model replaying canned responses and recording what it was sent
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, ChatError>>>,
    repeat: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<ModelResponse, ChatError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Ok(ModelResponse::text(*t))).collect())
    }

    fn repeating(text: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate_content(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<ModelResponse, ChatError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        match &self.repeat {
            Some(text) => Ok(ModelResponse::text(text.clone())),
            None => Err(ChatError::Api("script exhausted".to_string())),
        }
    }
}

fn calculator() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "calculator",
        "Adds two integers written as 'a+b'",
        |input: String| async move {
            let (a, b) = input
                .split_once('+')
                .ok_or_else(|| ToolError::Failed(format!("cannot parse {}", input)))?;
            let a: i64 = a.trim().parse().map_err(|_| ToolError::Failed("bad operand".into()))?;
            let b: i64 = b.trim().parse().map_err(|_| ToolError::Failed("bad operand".into()))?;
            Ok::<_, ToolError>((a + b).to_string())
        },
    ))
}

fn tools() -> ToolSet {
    ToolSet::new(vec![calculator()]).unwrap()
}

fn has_python() -> bool {
    if command_available("python3") {
        true
    } else {
        eprintln!("python3 not found, skipping");
        false
    }
}

async fn start(model: Arc<ScriptedModel>, config: AgentConfig) -> (AgentController, CancellationToken) {
    let cancel = CancellationToken::new();
    let agent = AgentController::start(model, tools(), config, &cancel)
        .await
        .unwrap();
    (agent, cancel)
}

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();
    assert_eq!(config.max_iterations, 10);
    assert_eq!(config.execution_timeout_secs, 30);
    assert!(config.system_prompt.is_none());
    assert!(config.state_modifier.is_none());
}

#[tokio::test]
async fn test_start_requires_a_tool() {
    let cancel = CancellationToken::new();
    let result = AgentController::start(
        ScriptedModel::texts(&["hi"]),
        ToolSet::default(),
        AgentConfig::default(),
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(AgentError::Config(_))));
}

#[tokio::test]
async fn test_answer_without_code_completes() {
    let model = ScriptedModel::texts(&["The answer is 42."]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let run = agent.run_task(&cancel, "What is 6*7?").await.unwrap();
    assert_eq!(run.stop_reason, StopReason::Completed);
    assert_eq!(run.iterations, 1);
    assert_eq!(run.final_response, "The answer is 42.");
    assert!(run.executions.is_empty());
    assert!(!run.trace_id.is_empty());
    assert_eq!(model.calls().len(), 1);

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_max_iterations_stops_with_advisory() {
    let model = ScriptedModel::repeating("```python\nprint('again')\n```");
    let config = AgentConfig {
        max_iterations: 3,
        ..Default::default()
    };
    let (agent, cancel) = start(model.clone(), config).await;

    let run = agent.run_task(&cancel, "loop forever").await.unwrap();
    assert_eq!(model.calls().len(), 3);
    assert_eq!(run.iterations, 3);
    assert_eq!(run.stop_reason, StopReason::MaxIterations);
    assert_eq!(run.executions.len(), 3);
    assert_eq!(run.final_response, MAX_ITERATIONS_MESSAGE);

    let last = run.state.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text(), MAX_ITERATIONS_MESSAGE);

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_system_message_inserted_once() {
    let model = ScriptedModel::texts(&["```python\nprint(1)\n```", "Done: 1"]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let run = agent.run_task(&cancel, "print one").await.unwrap();

    let systems = run
        .state
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .count();
    assert_eq!(systems, 1);
    assert_eq!(run.state.messages[0].role, Role::System);
    assert_eq!(run.state.messages[0].text(), agent.system_prompt());

    for sent in model.calls() {
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    // system, user, assistant(code), user(result), assistant(answer)
    assert_eq!(run.state.messages.len(), 5);
    assert_eq!(run.state.messages[3].role, Role::User);
    assert!(run.state.messages[3].text().starts_with("[Code Execution"));

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_custom_prompt_and_state_modifier() {
    let model = ScriptedModel::texts(&["ok"]);
    let config = AgentConfig {
        system_prompt: Some("You are terse.".to_string()),
        state_modifier: Some(Arc::new(|mut messages: Vec<Message>| {
            messages.push(Message::user("Reply in one word."));
            messages
        })),
        ..Default::default()
    };
    let (agent, cancel) = start(model.clone(), config).await;
    assert!(agent.system_prompt().starts_with("You are terse.\n\n"));

    let run = agent.run_task(&cancel, "hello").await.unwrap();

    let sent = &model.calls()[0];
    assert_eq!(sent[0].role, Role::System);
    assert_eq!(sent.last().unwrap().text(), "Reply in one word.");
    // The modifier only shapes the outgoing request
    assert!(!run
        .state
        .messages
        .iter()
        .any(|m| m.text() == "Reply in one word."));

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_model_error_is_fatal() {
    let model = ScriptedModel::new(vec![Err(ChatError::Api("backend down".to_string()))]);
    let (agent, cancel) = start(model, AgentConfig::default()).await;

    let err = agent.run_task(&cancel, "anything").await.unwrap_err();
    match err {
        AgentError::Model(ChatError::Api(msg)) => assert_eq!(msg, "backend down"),
        other => panic!("expected model error, got {}", other),
    }

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_empty_response() {
    let model = ScriptedModel::new(vec![
        Ok(ModelResponse { choices: vec![] }),
        Ok(ModelResponse {
            choices: vec![Choice::text("")],
        }),
    ]);
    let (agent, cancel) = start(model, AgentConfig::default()).await;

    for _ in 0..2 {
        let err = agent.run_task(&cancel, "anything").await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyResponse));
    }

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_run() {
    let model = ScriptedModel::texts(&["never used"]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = agent.run_task(&cancelled, "stop").await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert!(model.calls().is_empty());

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_existing_conversation_continues() {
    let model = ScriptedModel::texts(&["Still 4."]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let state = ConversationState {
        messages: vec![
            Message::user("What is 2+2?"),
            Message::assistant("4"),
            Message::user("Are you sure?"),
        ],
        iteration_count: 0,
    };
    let run = agent.run(&cancel, state).await.unwrap();
    assert_eq!(run.final_response, "Still 4.");
    assert_eq!(model.calls()[0].len(), 4);

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_calculator_round_trip() {
    if !has_python() {
        return;
    }
    let model = ScriptedModel::texts(&[
        "I'll use the calculator.\n```python\nprint(calculator('2+2'))\n```",
        "2+2 is 4.",
    ]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let run = agent.run_task(&cancel, "What is 2+2?").await.unwrap();
    assert_eq!(run.executions.len(), 1);
    assert!(run.executions[0].succeeded());
    assert_eq!(run.executions[0].result.output, "4");

    // The second model call saw the folded result
    let second = &model.calls()[1];
    assert_eq!(second.last().unwrap().text(), "[Code Execution Result]\n4");
    assert_eq!(run.final_response, "2+2 is 4.");

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_execution_error_is_reported_to_model() {
    if !has_python() {
        return;
    }
    let model = ScriptedModel::texts(&[
        "```python\nprint('partial')\nprint(calculator('oops'))\n```",
        "The calculator rejected the input.",
    ]);
    let (agent, cancel) = start(model.clone(), AgentConfig::default()).await;

    let run = agent.run_task(&cancel, "break it").await.unwrap();
    assert!(!run.executions[0].succeeded());

    let folded = model.calls()[1].last().unwrap().text();
    assert!(folded.starts_with("[Code Execution Error]\n"));
    assert!(folded.contains("cannot parse oops"));
    assert!(folded.ends_with("\n\nOutput:\npartial"));

    agent.close(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_syntax_error_has_stderr() {
    if !has_python() {
        return;
    }
    let executor = CodeExecutor::new(tools(), ExecutorConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    executor.start(&cancel).await.unwrap();

    let err = executor
        .execute(&cancel, "def broken(:\n    pass")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Runtime { .. }));
    let partial = err.partial().unwrap();
    assert!(!partial.stderr.is_empty());
    assert!(partial.stderr.contains("SyntaxError"));

    executor.stop(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_tool_calls_happen_in_program_order() {
    if !has_python() {
        return;
    }
    let log = Arc::new(Mutex::new(Vec::new()));
    let make = |name: &'static str| -> Arc<dyn Tool> {
        let log = log.clone();
        Arc::new(FnTool::new(name, "Records its invocation", move |input: String| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{}:{}", name, input));
                Ok(name.to_string())
            }
        }))
    };
    let tools = ToolSet::new(vec![make("first"), make("second")]).unwrap();

    let executor = CodeExecutor::new(tools, ExecutorConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    executor.start(&cancel).await.unwrap();

    let result = executor
        .execute(&cancel, "a = first('x')\nb = second({'n': 1})\nprint(a, b)")
        .await
        .unwrap();
    assert_eq!(result.output, "first second");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:x".to_string(), "second:{\"n\": 1}".to_string()]
    );

    executor.stop(&cancel).await.unwrap();
}

/// Test the full loop against a local Ollama
#[tokio::test]
#[ignore = "Requires Ollama running with a code model"]
async fn test_ollama_calculator_task() {
    let url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let model = Arc::new(ptc_agent::OllamaChat::new(url, "qwen2.5-coder"));
    let cancel = CancellationToken::new();
    let agent = AgentController::start(model, tools(), AgentConfig::default(), &cancel)
        .await
        .unwrap();

    let run = agent
        .run_task(&cancel, "Use the calculator to add 19 and 23, then state the sum.")
        .await
        .unwrap();
    assert!(run.final_response.contains("42"));

    agent.close(&cancel).await.unwrap();
}
