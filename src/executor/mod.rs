//! Code executor
//!
//! Runs model-written programs in a child process with a tool bridge
//! injected, so every tool call the program makes becomes an HTTP request
//! to the executor's own [`ToolServer`].
//!
//! ```text
//!   execute(code)
//!        │
//!        ▼
//!   ┌──────────────┐   compose   ┌───────────────────────┐
//!   │ CodeExecutor │────────────►│ scratch dir (tempfile) │
//!   └──────┬───────┘             │  main.py | main.go ... │
//!          │ owns                └──────────┬────────────┘
//!          ▼                                │ python3 / go build + run
//!   ┌──────────────┐   POST /call   ┌───────▼──────┐
//!   │  ToolServer  │◄───────────────│ child process │
//!   └──────────────┘                └──────────────┘
//! ```

pub mod bridge;
pub mod process;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};
use crate::tools::{ServerError, ToolServer, ToolSet};
use bridge::{BRIDGE_UNREACHABLE_EXIT_CODE, BRIDGE_UNREACHABLE_MARKER, TOOL_SERVER_URL_ENV};
use process::{ExitKind, ProcessOutput};

// ─────────────────────────────────────────────────────────────────────────────
// Language & mode
// ─────────────────────────────────────────────────────────────────────────────

/// Target language for generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionLanguage {
    #[default]
    Python,
    Go,
}

impl ExecutionLanguage {
    /// Tag used on fenced code blocks
    pub fn fence_tag(&self) -> &'static str {
        match self {
            ExecutionLanguage::Python => "python",
            ExecutionLanguage::Go => "go",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ExecutionLanguage::Python => "Python",
            ExecutionLanguage::Go => "Go",
        }
    }
}

impl fmt::Display for ExecutionLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fence_tag())
    }
}

impl FromStr for ExecutionLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(ExecutionLanguage::Python),
            "go" | "golang" => Ok(ExecutionLanguage::Go),
            other => Err(format!(
                "unsupported language: {}. Supported: python, go",
                other
            )),
        }
    }
}

/// How generated code reaches the tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Tool calls go through the loopback HTTP tool server
    #[default]
    Server,
    /// In-process invocation; not implemented
    Direct,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Server => f.write_str("server"),
            ExecutionMode::Direct => f.write_str("direct"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(ExecutionMode::Server),
            "direct" => Ok(ExecutionMode::Direct),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Executor configuration, validated once at construction
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub language: ExecutionLanguage,
    pub mode: ExecutionMode,
    /// Wall-clock limit for one execution, compile step included
    pub timeout: Duration,
    /// Per-request timeout used by the bridge's HTTP client
    pub tool_call_timeout: Duration,
    pub python_command: String,
    pub go_command: String,
    /// Parent directory for scratch dirs; system temp dir when `None`
    pub scratch_root: Option<PathBuf>,
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            language: ExecutionLanguage::Python,
            mode: ExecutionMode::Server,
            timeout: Duration::from_secs(30),
            tool_call_timeout: Duration::from_secs(30),
            python_command: "python3".to_string(),
            go_command: "go".to_string(),
            scratch_root: None,
            shutdown_timeout: crate::tools::server::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("execution timeout must be greater than zero".to_string());
        }
        if self.tool_call_timeout.is_zero() {
            return Err("tool call timeout must be greater than zero".to_string());
        }
        if self.python_command.trim().is_empty() || self.go_command.trim().is_empty() {
            return Err("interpreter commands must not be empty".to_string());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results & errors
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Human-facing result: stdout without trailing whitespace
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: f64,
    pub timed_out: bool,
}

impl ExecutionResult {
    fn from_process(out: ProcessOutput) -> Self {
        Self {
            output: out.stdout.trim_end().to_string(),
            exit_code: match out.exit {
                ExitKind::Exited(code) => code,
                ExitKind::TimedOut | ExitKind::Cancelled => None,
            },
            timed_out: out.exit == ExitKind::TimedOut,
            duration_ms: out.duration.as_secs_f64() * 1000.0,
            stdout: out.stdout,
            stderr: out.stderr,
        }
    }
}

#[derive(Debug)]
pub enum ExecutionError {
    /// `execute` called before `start`
    ServerNotRunning,
    /// Mode not implemented
    Unsupported(ExecutionMode),
    /// Scratch directory could not be prepared
    Scratch(std::io::Error),
    /// Interpreter or compiler could not be spawned
    Launch {
        program: String,
        source: std::io::Error,
    },
    /// Go build failed
    Compile { result: ExecutionResult },
    /// Program exited non-zero
    Runtime { result: ExecutionResult },
    /// Bridge could not reach the tool server
    ToolServerUnreachable { result: ExecutionResult },
    Timeout {
        after: Duration,
        result: ExecutionResult,
    },
    Cancelled { result: ExecutionResult },
}

impl ExecutionError {
    /// Output captured before the failure, if the program got that far
    pub fn partial(&self) -> Option<&ExecutionResult> {
        match self {
            ExecutionError::Compile { result }
            | ExecutionError::Runtime { result }
            | ExecutionError::ToolServerUnreachable { result }
            | ExecutionError::Timeout { result, .. }
            | ExecutionError::Cancelled { result } => Some(result),
            ExecutionError::ServerNotRunning
            | ExecutionError::Unsupported(_)
            | ExecutionError::Scratch(_)
            | ExecutionError::Launch { .. } => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::ServerNotRunning => "server_not_running",
            ExecutionError::Unsupported(_) => "unsupported",
            ExecutionError::Scratch(_) => "scratch",
            ExecutionError::Launch { .. } => "launch",
            ExecutionError::Compile { .. } => "compile",
            ExecutionError::Runtime { .. } => "runtime",
            ExecutionError::ToolServerUnreachable { .. } => "unreachable",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Cancelled { .. } => "cancelled",
        }
    }
}

fn stderr_suffix(result: &ExecutionResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::ServerNotRunning => {
                write!(f, "tool server is not running; call start first")
            }
            ExecutionError::Unsupported(mode) => {
                write!(f, "execution mode '{}' is not supported", mode)
            }
            ExecutionError::Scratch(e) => write!(f, "failed to prepare scratch directory: {}", e),
            ExecutionError::Launch { program, source } => {
                write!(f, "failed to launch {}: {}", program, source)
            }
            ExecutionError::Compile { result } => {
                write!(f, "compilation failed{}", stderr_suffix(result))
            }
            ExecutionError::Runtime { result } => match result.exit_code {
                Some(code) => write!(f, "exit status {}{}", code, stderr_suffix(result)),
                None => write!(f, "terminated by signal{}", stderr_suffix(result)),
            },
            ExecutionError::ToolServerUnreachable { result } => {
                write!(f, "tool server unreachable{}", stderr_suffix(result))
            }
            ExecutionError::Timeout { after, result } => {
                write!(f, "execution timed out after {:?}{}", after, stderr_suffix(result))
            }
            ExecutionError::Cancelled { .. } => write!(f, "execution cancelled"),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionError::Scratch(e) => Some(e),
            ExecutionError::Launch { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Tool entry as shown to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Language-specific call signature, e.g. `calculator(input: str) -> str`
    pub signature: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

/// Runs generated code against a set of tools
pub struct CodeExecutor {
    config: ExecutorConfig,
    tools: ToolSet,
    server: ToolServer,
}

impl CodeExecutor {
    pub fn new(tools: ToolSet, config: ExecutorConfig) -> Result<Self, String> {
        config.validate()?;
        let server = ToolServer::with_shutdown_timeout(tools.clone(), config.shutdown_timeout);
        Ok(Self {
            config,
            tools,
            server,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn language(&self) -> ExecutionLanguage {
        self.config.language
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn server(&self) -> &ToolServer {
        &self.server
    }

    /// Start the owned tool server
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), ServerError> {
        let addr = self.server.start(cancel).await?;
        debug!(%addr, language = %self.config.language, "Executor ready");
        Ok(())
    }

    /// Stop the owned tool server; no-op when not running
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), ServerError> {
        self.server.stop(cancel).await
    }

    /// One definition per registered tool, in registration order
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                signature: bridge::signature(self.config.language, tool.name()),
            })
            .collect()
    }

    /// Run `code` with the tool bridge injected
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        code: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let language = self.config.language;
        let span = info_span!("execute_code", %language, code_len = code.len());

        let result = self.execute_inner(cancel, code).instrument(span).await;

        let (status, duration_ms) = match &result {
            Ok(r) => ("success", Some(r.duration_ms)),
            Err(e) => (e.kind(), e.partial().map(|r| r.duration_ms)),
        };
        CODE_EXECUTIONS
            .with_label_values(&[language.fence_tag(), status])
            .inc();
        if let Some(ms) = duration_ms {
            CODE_EXECUTION_DURATION
                .with_label_values(&[language.fence_tag()])
                .observe(ms / 1000.0);
        }

        result
    }

    async fn execute_inner(
        &self,
        cancel: &CancellationToken,
        code: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        if self.config.mode == ExecutionMode::Direct {
            return Err(ExecutionError::Unsupported(ExecutionMode::Direct));
        }
        if !self.server.is_running() {
            return Err(ExecutionError::ServerNotRunning);
        }

        let base_url = self.server.base_url();
        let program = bridge::compose(
            self.config.language,
            &self.tools,
            &base_url,
            code,
            self.config.tool_call_timeout,
        );

        let scratch = match &self.config.scratch_root {
            Some(root) => tempfile::Builder::new().prefix("ptc-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("ptc-").tempdir(),
        }
        .map_err(ExecutionError::Scratch)?;

        for (name, contents) in &program.files {
            tokio::fs::write(scratch.path().join(name), contents)
                .await
                .map_err(ExecutionError::Scratch)?;
        }

        info!(
            dir = %scratch.path().display(),
            tools = self.tools.len(),
            "Running generated program"
        );

        let env = [(TOOL_SERVER_URL_ENV, base_url.as_str())];
        let started = tokio::time::Instant::now();

        let out = match self.config.language {
            ExecutionLanguage::Python => {
                let python = &self.config.python_command;
                process::run(
                    python,
                    &["-u", program.entry.as_str()],
                    scratch.path(),
                    &env,
                    self.config.timeout,
                    cancel,
                )
                .await
                .map_err(|source| ExecutionError::Launch {
                    program: python.clone(),
                    source,
                })?
            }
            ExecutionLanguage::Go => {
                let go = &self.config.go_command;
                let mut build_args = vec!["build", "-o", "program"];
                build_args.extend(program.files.iter().map(|(name, _)| name.as_str()));

                let build = process::run(
                    go,
                    &build_args,
                    scratch.path(),
                    &env,
                    self.config.timeout,
                    cancel,
                )
                .await
                .map_err(|source| ExecutionError::Launch {
                    program: go.clone(),
                    source,
                })?;

                match build.exit {
                    ExitKind::Exited(Some(0)) => {}
                    ExitKind::TimedOut => {
                        return Err(ExecutionError::Timeout {
                            after: self.config.timeout,
                            result: ExecutionResult::from_process(build),
                        })
                    }
                    ExitKind::Cancelled => {
                        return Err(ExecutionError::Cancelled {
                            result: ExecutionResult::from_process(build),
                        })
                    }
                    ExitKind::Exited(_) => {
                        warn!("Go build failed");
                        return Err(ExecutionError::Compile {
                            result: ExecutionResult::from_process(build),
                        });
                    }
                }

                // The compile step counts against the same deadline
                let remaining = self.config.timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(ExecutionError::Timeout {
                        after: self.config.timeout,
                        result: ExecutionResult::default(),
                    });
                }

                let binary = scratch.path().join("program");
                let binary = binary.to_string_lossy();
                process::run(&binary, &[], scratch.path(), &env, remaining, cancel)
                    .await
                    .map_err(|source| ExecutionError::Launch {
                        program: binary.to_string(),
                        source,
                    })?
            }
        };

        let exit = out.exit;
        let result = ExecutionResult::from_process(out);
        debug!(
            exit = ?exit,
            duration_ms = result.duration_ms,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Program finished"
        );

        match exit {
            ExitKind::Exited(Some(0)) => Ok(result),
            // The exit code alone could come from the program itself
            ExitKind::Exited(Some(BRIDGE_UNREACHABLE_EXIT_CODE))
                if result.stderr.contains(BRIDGE_UNREACHABLE_MARKER) =>
            {
                warn!(base_url = %base_url, "Generated program could not reach the tool server");
                Err(ExecutionError::ToolServerUnreachable { result })
            }
            ExitKind::Exited(_) => Err(ExecutionError::Runtime { result }),
            ExitKind::TimedOut => {
                warn!(timeout = ?self.config.timeout, "Generated program timed out");
                Err(ExecutionError::Timeout {
                    after: self.config.timeout,
                    result,
                })
            }
            ExitKind::Cancelled => Err(ExecutionError::Cancelled { result }),
        }
    }
}

impl fmt::Debug for CodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExecutor")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .field("server", &self.server)
            .finish()
    }
}

/// True when `program` can be found on `PATH`
pub fn command_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, Tool, ToolError};
    use std::sync::Arc;

    fn calculator_tools() -> ToolSet {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(FnTool::new("calculator", "Evaluates a+b", |input: String| async move {
                let (a, b) = input
                    .split_once('+')
                    .ok_or_else(|| ToolError::Failed(format!("cannot parse {}", input)))?;
                let a: i64 = a.trim().parse().map_err(|_| ToolError::Failed("bad a".into()))?;
                let b: i64 = b.trim().parse().map_err(|_| ToolError::Failed("bad b".into()))?;
                Ok::<_, ToolError>((a + b).to_string())
            })),
            Arc::new(FnTool::constant("greet", "Says hi", "hi")),
        ];
        ToolSet::new(tools).unwrap()
    }

    fn executor(language: ExecutionLanguage) -> CodeExecutor {
        CodeExecutor::new(
            calculator_tools(),
            ExecutorConfig {
                language,
                timeout: Duration::from_secs(20),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("Python".parse::<ExecutionLanguage>().unwrap(), ExecutionLanguage::Python);
        assert_eq!("golang".parse::<ExecutionLanguage>().unwrap(), ExecutionLanguage::Go);
        assert!("rust".parse::<ExecutionLanguage>().is_err());
        assert_eq!(ExecutionLanguage::default(), ExecutionLanguage::Python);
        assert_eq!(ExecutionMode::default(), ExecutionMode::Server);
    }

    #[test]
    fn test_config_validation() {
        assert!(ExecutorConfig::default().validate().is_ok());
        let bad = ExecutorConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(CodeExecutor::new(calculator_tools(), bad).is_err());
    }

    #[test]
    fn test_tool_definitions_list_each_tool_once() {
        for language in [ExecutionLanguage::Python, ExecutionLanguage::Go] {
            let defs = executor(language).tool_definitions();
            let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
            assert_eq!(names, vec!["calculator", "greet"]);
            assert_eq!(defs[0].signature, bridge::signature(language, "calculator"));
        }
    }

    #[tokio::test]
    async fn test_execute_requires_running_server() {
        let exec = executor(ExecutionLanguage::Python);
        let err = exec
            .execute(&CancellationToken::new(), "print(1)")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ServerNotRunning));
        assert!(err.partial().is_none());
    }

    #[tokio::test]
    async fn test_direct_mode_is_unsupported() {
        let exec = CodeExecutor::new(
            calculator_tools(),
            ExecutorConfig {
                mode: ExecutionMode::Direct,
                ..Default::default()
            },
        )
        .unwrap();
        let err = exec
            .execute(&CancellationToken::new(), "print(1)")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Unsupported(ExecutionMode::Direct)));
    }

    #[tokio::test]
    async fn test_start_stop_repeatedly() {
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        for _ in 0..2 {
            exec.start(&cancel).await.unwrap();
            assert!(exec.server().port() > 0);
            exec.stop(&cancel).await.unwrap();
            assert_eq!(exec.server().port(), 0);
        }
    }

    #[tokio::test]
    async fn test_python_calculator_round_trip() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let result = exec
            .execute(&cancel, "print(calculator('2+2'))")
            .await
            .unwrap();
        assert_eq!(result.output, "4");
        assert_eq!(result.exit_code, Some(0));

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_tool_error_raises() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let code = "try:\n    calculator('nonsense')\nexcept ToolCallError as e:\n    print('caught', e)";
        let result = exec.execute(&cancel, code).await.unwrap();
        assert!(result.output.starts_with("caught calculator: cannot parse nonsense"));

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_runtime_error_keeps_output() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let err = exec
            .execute(&cancel, "print('before')\nraise ValueError('bad value')")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Runtime { .. }));
        let partial = err.partial().unwrap();
        assert_eq!(partial.output, "before");
        assert!(partial.stderr.contains("ValueError: bad value"));
        assert!(err.to_string().contains("bad value"));

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_timeout() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = CodeExecutor::new(
            calculator_tools(),
            ExecutorConfig {
                timeout: Duration::from_secs(1),
                ..Default::default()
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let err = exec
            .execute(&cancel, "import time\nprint('sleeping')\ntime.sleep(30)")
            .await
            .unwrap_err();
        match &err {
            ExecutionError::Timeout { result, .. } => {
                assert!(result.timed_out);
                assert_eq!(result.output, "sleeping");
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_unreachable_server() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        // Point the bridge at a port nothing listens on
        let code = "_PTC_CALL_URL = 'http://127.0.0.1:9/call'\nprint(greet())";
        let err = exec.execute(&cancel, code).await.unwrap_err();
        assert!(matches!(err, ExecutionError::ToolServerUnreachable { .. }));

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_exit_86_is_a_runtime_error() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let code = format!("import sys\nprint('bye')\nsys.exit({})", BRIDGE_UNREACHABLE_EXIT_CODE);
        let err = exec.execute(&cancel, &code).await.unwrap_err();
        match &err {
            ExecutionError::Runtime { result } => {
                assert_eq!(result.exit_code, Some(BRIDGE_UNREACHABLE_EXIT_CODE));
                assert_eq!(result.output, "bye");
            }
            other => panic!("expected runtime error, got {:?}", other),
        }

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_slow_tool_raises_timeout_error() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FnTool::new(
            "slow_lookup",
            "Takes a while",
            |_input: String| async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<_, ToolError>("late".to_string())
            },
        ))];
        let exec = CodeExecutor::new(
            ToolSet::new(tools).unwrap(),
            ExecutorConfig {
                timeout: Duration::from_secs(20),
                tool_call_timeout: Duration::from_secs(1),
                ..Default::default()
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let code = "try:\n    slow_lookup('x')\nexcept ToolCallError as e:\n    print('caught', e)";
        let result = exec.execute(&cancel, code).await.unwrap();
        assert_eq!(result.output, "caught slow_lookup: timed out after 1s");

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_python_bridge_ignores_proxy_env() {
        if !command_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let exec = executor(ExecutionLanguage::Python);
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        // Run the composed program by hand so the proxy variables stay local
        // to the child instead of leaking into this process
        let program = bridge::compose(
            ExecutionLanguage::Python,
            exec.tools(),
            &exec.server().base_url(),
            "print(calculator('2+2'))",
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in &program.files {
            std::fs::write(dir.path().join(name), contents).unwrap();
        }
        let dead_proxy = "http://127.0.0.1:9";
        let env = [
            ("http_proxy", dead_proxy),
            ("HTTP_PROXY", dead_proxy),
            ("all_proxy", dead_proxy),
            ("no_proxy", ""),
            ("NO_PROXY", ""),
        ];
        let out = process::run(
            "python3",
            &["-u", program.entry.as_str()],
            dir.path(),
            &env,
            Duration::from_secs(20),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(out.exit, ExitKind::Exited(Some(0)), "stderr: {}", out.stderr);
        assert_eq!(out.stdout.trim_end(), "4");

        exec.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_go_calculator_round_trip() {
        if !command_available("go") {
            eprintln!("go not found, skipping");
            return;
        }
        let exec = CodeExecutor::new(
            calculator_tools(),
            ExecutorConfig {
                language: ExecutionLanguage::Go,
                timeout: Duration::from_secs(120),
                ..Default::default()
            },
        )
        .unwrap();
        let cancel = CancellationToken::new();
        exec.start(&cancel).await.unwrap();

        let code = "out, err := calculator(\"2+2\")\nif err != nil {\n\tpanic(err)\n}\nfmt.Println(out)";
        let result = exec.execute(&cancel, code).await.unwrap();
        assert_eq!(result.output, "4");

        let err = exec
            .execute(&cancel, "this is not go")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Compile { .. }));

        exec.stop(&cancel).await.unwrap();
    }
}
