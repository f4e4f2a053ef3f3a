//! Tool registry for programmatic tool calling
//!
//! Tools are plain string-in/string-out capabilities supplied by the caller.
//! A [`ToolSet`] holds them in registration order and is shared (read-only)
//! between the [`ToolServer`] that answers bridge requests and the
//! [`CodeExecutor`](crate::executor::CodeExecutor) that renders the catalog.
//!
//! # Architecture
//!
//! ```text
//! generated program ── POST /call {tool_name, input} ──► ToolServer
//!                                                          │
//!                                                  ToolSet::get(name)
//!                                                          │
//!                                                  Tool::call(input)
//!                                                          │
//!      ◄── {success, result | error, tool, input} ─────────┘
//! ```

pub mod command;
pub mod protocol;
pub mod server;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

pub use command::{CommandTool, CommandToolSpec};
pub use protocol::{ToolRequest, ToolResponse};
pub use server::{ServerError, ToolServer};

/// A named capability the generated code can call
///
/// Implementations must be safe to call concurrently: the server handles each
/// bridge request on its own task and never serializes calls to a tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, also used as the function name inside generated code
    fn name(&self) -> &str;

    /// Human-readable description shown to the model
    fn description(&self) -> &str;

    /// Invoke the tool with a single string argument
    async fn call(&self, input: &str) -> Result<String, ToolError>;
}

/// Error type for tool lookup and invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// No tool registered under this name
    NotFound(String),
    /// The tool ran and reported a failure
    Failed(String),
    /// The tool did not finish in time
    Timeout(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::Failed(msg) => write!(f, "{}", msg),
            ToolError::Timeout(name) => write!(f, "tool {} timed out", name),
        }
    }
}

impl std::error::Error for ToolError {}

/// Error returned when building a [`ToolSet`]
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Two tools share a name
    Duplicate(String),
    /// Name cannot be used as a function identifier in generated code
    InvalidName(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Duplicate(name) => write!(f, "duplicate tool name: {}", name),
            RegistryError::InvalidName(name) => write!(
                f,
                "invalid tool name '{}': must be an identifier, not a keyword or builtin name",
                name
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Ordered, name-unique collection of tools
///
/// Cloning is cheap; clones share the same tool instances.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    /// Build a tool set, rejecting duplicate or non-identifier names
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, RegistryError> {
        let mut set = Self::default();
        for tool in tools {
            set.insert(tool)?;
        }
        Ok(set)
    }

    /// Add a tool to the end of the set
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Iterate tools in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up and invoke a tool in one step
    pub async fn call(&self, name: &str, input: &str) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.call(input).await
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .finish()
    }
}

/// Keywords of the bridge languages; a tool cannot be named after one
const RESERVED: &[&str] = &[
    // Python
    "False", "None", "True", "and", "as", "assert", "async", "await", "class", "def", "del",
    "elif", "except", "finally", "from", "global", "is", "lambda", "nonlocal", "not", "or",
    "pass", "raise", "try", "while", "with", "yield",
    // Go
    "chan", "const", "default", "defer", "fallthrough", "func", "go", "goto", "interface", "map",
    "package", "range", "select", "struct", "switch", "type", "var",
    // Both
    "break", "continue", "else", "for", "if", "import", "return",
];

/// Names a tool would shadow inside generated programs
///
/// Python builtins and modules that generated code routinely relies on, Go
/// predeclared identifiers, the packages imported by the Go bridge and the
/// program entry points.
const SHADOWED: &[&str] = &[
    // Python builtins
    "abs", "all", "any", "bool", "dict", "enumerate", "eval", "exec", "filter", "float",
    "getattr", "hasattr", "id", "input", "int", "isinstance", "iter", "len", "list", "max", "min",
    "next", "object", "open", "print", "repr", "round", "set", "sorted", "str", "sum", "super",
    "tuple", "zip", "Exception", "ToolCallError",
    // Python modules commonly imported by generated code
    "json", "math", "re", "sys",
    // Go predeclared identifiers not already listed
    "append", "byte", "cap", "clear", "close", "comparable", "complex",
    "complex64", "complex128", "copy", "delete", "error", "false", "float32", "float64", "imag",
    "int8", "int16", "int32", "int64", "iota", "make", "new", "nil", "panic", "println", "real",
    "recover", "rune", "string", "true", "uint", "uint8", "uint16", "uint32", "uint64", "uintptr",
    // Go bridge imports and entry points
    "bytes", "fmt", "http", "io", "net", "os", "time", "main", "init",
];

/// Both Python and Go accept this shape as a function name
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !RESERVED.contains(&name)
}

/// Usable as a tool function in both bridges without clobbering anything
fn is_valid_tool_name(name: &str) -> bool {
    is_identifier(name)
        && !SHADOWED.contains(&name)
        // Bridge internals live under these prefixes
        && !name.starts_with("_ptc")
        && !name.starts_with("ptc")
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

/// Tool backed by an async closure
///
/// ```ignore
/// let calc = FnTool::new("calculator", "Evaluates arithmetic", |input| async move {
///     Ok(format!("{}", eval(&input)?))
/// });
/// ```
pub struct FnTool {
    name: String,
    description: String,
    func: Box<dyn Fn(String) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Box::new(move |input| Box::pin(func(input))),
        }
    }

    /// Tool that always answers with the same text
    pub fn constant(
        name: impl Into<String>,
        description: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        let response = response.into();
        Self::new(name, description, move |_| {
            let response = response.clone();
            async move { Ok(response) }
        })
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, input: &str) -> Result<String, ToolError> {
        (self.func)(input.to_string()).await
    }
}
