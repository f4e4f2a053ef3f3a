//! Loopback HTTP server exposing a [`ToolSet`] to generated programs
//!
//! The server binds an ephemeral port on `127.0.0.1`, so several executors can
//! run side by side without coordinating ports. Every request is handled on
//! its own task; the only shared state is the read-only tool table.
//!
//! # Routes
//!
//! | Method | Path       | Purpose                                      |
//! |--------|------------|----------------------------------------------|
//! | POST   | `/call`    | Invoke a tool (see [`protocol`](super::protocol)) |
//! | GET    | `/tools`   | Tool catalog as JSON                         |
//! | GET    | `/health`  | Liveness check                               |
//! | GET    | `/metrics` | Prometheus text exposition                   |

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ToolInfo, ToolRequest, ToolResponse, CALL_PATH};
use super::{ToolError, ToolSet};
use crate::metrics::{TOOL_CALLS, TOOL_CALL_DURATION, TOOL_SERVERS_RUNNING};

/// How long `stop` waits for in-flight requests before aborting them
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for aborted handlers to answer before the task is killed
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Error type for server lifecycle operations
#[derive(Debug)]
pub enum ServerError {
    /// No local port could be bound
    Bind(std::io::Error),
    /// The serving task failed while shutting down
    Shutdown(String),
    /// The caller cancelled the operation
    Cancelled,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "failed to bind tool server: {}", e),
            ServerError::Shutdown(msg) => write!(f, "tool server shutdown failed: {}", msg),
            ServerError::Cancelled => write!(f, "tool server operation cancelled"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(e) => Some(e),
            _ => None,
        }
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    /// Fails in-flight tool calls once draining gives up
    abort: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

/// HTTP tool server with a restartable lifecycle
///
/// `start` is idempotent while running, `stop` is a no-op when stopped, and a
/// stopped server can be started again (it will usually get a new port).
pub struct ToolServer {
    tools: ToolSet,
    shutdown_timeout: Duration,
    /// Serializes start/stop so concurrent callers never bind twice
    lifecycle: tokio::sync::Mutex<()>,
    running: Mutex<Option<RunningServer>>,
}

impl ToolServer {
    pub fn new(tools: ToolSet) -> Self {
        Self::with_shutdown_timeout(tools, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_shutdown_timeout(tools: ToolSet, shutdown_timeout: Duration) -> Self {
        Self {
            tools,
            shutdown_timeout,
            lifecycle: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        }
    }

    /// Registered tools
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Bind an ephemeral loopback port and start serving
    ///
    /// Returns the bound address. Calling this while already running returns
    /// the existing address without rebinding.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<SocketAddr, ServerError> {
        let _guard = self.lifecycle.lock().await;

        {
            let mut running = self.lock_running();
            match running.as_ref() {
                Some(server) if !server.handle.is_finished() => return Ok(server.addr),
                Some(_) => {
                    warn!("Tool server task exited unexpectedly, rebinding");
                    *running = None;
                    TOOL_SERVERS_RUNNING.dec();
                }
                None => {}
            }
        }

        let listener = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ServerError::Cancelled),
            bound = TcpListener::bind(("127.0.0.1", 0)) => bound.map_err(ServerError::Bind)?,
        };
        let addr = listener.local_addr().map_err(ServerError::Bind)?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let abort = CancellationToken::new();
        let router = router(self.tools.clone(), abort.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        *self.lock_running() = Some(RunningServer {
            addr,
            shutdown,
            abort,
            handle,
        });
        TOOL_SERVERS_RUNNING.inc();

        info!(%addr, tools = self.tools.len(), "Tool server started");
        Ok(addr)
    }

    /// Gracefully stop serving and release the port
    ///
    /// In-flight requests are drained until `cancel` fires or the shutdown
    /// timeout elapses, after which they are aborted.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), ServerError> {
        let _guard = self.lifecycle.lock().await;

        let Some(server) = self.lock_running().take() else {
            return Ok(());
        };
        TOOL_SERVERS_RUNNING.dec();

        server.shutdown.cancel();
        let mut handle = server.handle;

        let joined = tokio::select! {
            biased;
            joined = &mut handle => Some(joined),
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(self.shutdown_timeout) => None,
        };

        match joined {
            Some(Ok(Ok(()))) => {
                info!(addr = %server.addr, "Tool server stopped");
                Ok(())
            }
            Some(Ok(Err(e))) => Err(ServerError::Shutdown(e.to_string())),
            Some(Err(e)) => Err(ServerError::Shutdown(e.to_string())),
            None => {
                warn!(addr = %server.addr, "Aborting in-flight tool requests");
                server.abort.cancel();
                if tokio::time::timeout(ABORT_GRACE, &mut handle).await.is_err() {
                    handle.abort();
                    // Awaiting the aborted task drops the listener
                    let _ = handle.await;
                }
                Ok(())
            }
        }
    }

    /// Bound port, or 0 when not running
    pub fn port(&self) -> u16 {
        self.lock_running()
            .as_ref()
            .map(|s| s.addr.port())
            .unwrap_or(0)
    }

    /// Base URL such as `http://127.0.0.1:41234`, or empty when not running
    pub fn base_url(&self) -> String {
        self.lock_running()
            .as_ref()
            .map(|s| format!("http://{}", s.addr))
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningServer>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("tools", &self.tools.names())
            .field("base_url", &self.base_url())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Drop for ToolServer {
    fn drop(&mut self) {
        if let Some(server) = self.lock_running().take() {
            server.shutdown.cancel();
            server.handle.abort();
            TOOL_SERVERS_RUNNING.dec();
        }
    }
}

/// Metric label for calls naming a tool that is not registered
const UNKNOWN_TOOL_LABEL: &str = "unknown";

#[derive(Clone)]
struct ServerState {
    tools: ToolSet,
    abort: CancellationToken,
}

/// Build the router serving `tools`
pub fn create_router(tools: ToolSet) -> Router {
    router(tools, CancellationToken::new())
}

fn router(tools: ToolSet, abort: CancellationToken) -> Router {
    Router::new()
        .route(CALL_PATH, post(call_tool))
        .route("/tools", get(list_tools))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(ServerState { tools, abort })
}

/// Invoke a tool; the status code mirrors the `success` flag
async fn call_tool(
    State(ServerState { tools, abort }): State<ServerState>,
    body: Bytes,
) -> impl IntoResponse {
    let request: ToolRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Malformed tool request");
            TOOL_CALLS.with_label_values(&["", "bad_request"]).inc();
            return (
                StatusCode::BAD_REQUEST,
                Json(ToolResponse::failure("", "", format!("invalid request: {}", e))),
            );
        }
    };

    let start = Instant::now();
    let ToolRequest { tool_name, input } = request;
    debug!(tool = %tool_name, input_len = input.len(), "Tool call");

    // Labels only ever carry registered names
    if tools.get(&tool_name).is_none() {
        TOOL_CALLS.with_label_values(&[UNKNOWN_TOOL_LABEL, "not_found"]).inc();
        let e = ToolError::NotFound(tool_name.clone());
        warn!(tool = %tool_name, "Unknown tool requested");
        return (
            StatusCode::NOT_FOUND,
            Json(ToolResponse::failure(tool_name, input, e.to_string())),
        );
    }

    let outcome = tokio::select! {
        outcome = tools.call(&tool_name, &input) => Some(outcome),
        _ = abort.cancelled() => None,
    };
    let Some(outcome) = outcome else {
        TOOL_CALLS.with_label_values(&[&tool_name, "aborted"]).inc();
        warn!(tool = %tool_name, "Tool call aborted by shutdown");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ToolResponse::failure(tool_name, input, "tool server shutting down")),
        );
    };
    TOOL_CALL_DURATION
        .with_label_values(&[&tool_name])
        .observe(start.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            TOOL_CALLS.with_label_values(&[&tool_name, "success"]).inc();
            (StatusCode::OK, Json(ToolResponse::ok(tool_name, input, result)))
        }
        Err(e) => {
            let (status, label) = match e {
                ToolError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ToolError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                ToolError::Failed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
            };
            TOOL_CALLS.with_label_values(&[&tool_name, label]).inc();
            warn!(tool = %tool_name, error = %e, "Tool call failed");
            (status, Json(ToolResponse::failure(tool_name, input, e.to_string())))
        }
    }
}

async fn list_tools(State(ServerState { tools, .. }): State<ServerState>) -> Json<Vec<ToolInfo>> {
    Json(
        tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect(),
    )
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics() -> String {
    crate::metrics::gather()
}
