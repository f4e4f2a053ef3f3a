//! Tools backed by external commands
//!
//! A command tool runs a program per call, writes the tool input to its
//! stdin and returns its stdout. This lets the CLI expose existing scripts
//! (`jq`, shell scripts, small binaries) to generated code without writing
//! Rust. Tools are described in a JSON manifest:
//!
//! ```json
//! [
//!   {"name": "word_count", "description": "Counts words in the input",
//!    "command": ["wc", "-w"], "timeout_secs": 5}
//! ]
//! ```

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Tool, ToolError};

fn default_timeout_secs() -> u64 {
    30
}

/// Manifest entry describing a command tool
#[derive(Debug, Clone, Deserialize)]
pub struct CommandToolSpec {
    pub name: String,
    pub description: String,
    /// Program followed by its arguments
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Tool that shells out to a program for every call
#[derive(Debug, Clone)]
pub struct CommandTool {
    spec: CommandToolSpec,
}

impl CommandTool {
    pub fn new(spec: CommandToolSpec) -> Result<Self, ToolError> {
        if spec.command.is_empty() {
            return Err(ToolError::Failed(format!(
                "tool {} has an empty command",
                spec.name
            )));
        }
        Ok(Self { spec })
    }

    /// Parse a JSON manifest into command tools
    pub fn from_manifest(json: &str) -> Result<Vec<Self>, ToolError> {
        let specs: Vec<CommandToolSpec> = serde_json::from_str(json)
            .map_err(|e| ToolError::Failed(format!("invalid tool manifest: {}", e)))?;
        specs.into_iter().map(Self::new).collect()
    }

    /// Read and parse a manifest file
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<Self>, ToolError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ToolError::Failed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_manifest(&json)
    }

    async fn run(&self, input: &str) -> Result<String, ToolError> {
        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| ToolError::Failed("empty command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Failed(format!("failed to run {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Programs that ignore stdin may exit before reading it
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(ToolError::Failed(format!("failed to write input: {}", e)));
                }
            }
            // Dropping stdin closes the pipe so the program sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to wait for {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::Failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    async fn call(&self, input: &str) -> Result<String, ToolError> {
        debug!(tool = %self.spec.name, command = ?self.spec.command, "Running command tool");
        let limit = Duration::from_secs(self.spec.timeout_secs);
        // The child is killed on drop when the timeout wins
        match timeout(limit, self.run(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.spec.name.clone())),
        }
    }
}
