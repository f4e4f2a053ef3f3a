//! Prometheus metrics for the PTC runtime
//!
//! Collectors live in the default registry; [`gather`] renders them in the
//! text exposition format served by the tool server on `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Server Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool invocations received over HTTP.
    ///
    /// Labels:
    /// - tool: Registered tool name, "unknown" for unregistered names, empty
    ///   for malformed requests
    /// - status: "success", "not_found", "error", "timeout", "aborted" or
    ///   "bad_request"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "ptc_tool_calls_total",
        "Tool invocations served by the tool server",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Time spent inside a tool implementation.
    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "ptc_tool_call_duration_seconds",
        "Tool invocation latency",
        &["tool"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    /// Tool servers currently accepting connections.
    pub static ref TOOL_SERVERS_RUNNING: Gauge = register_gauge!(
        "ptc_tool_servers_running",
        "Tool servers currently listening"
    ).expect("failed to register TOOL_SERVERS_RUNNING metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Code Execution Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Generated programs run, by language and outcome.
    ///
    /// Labels:
    /// - language: "python" or "go"
    /// - status: "success" or the error kind ("runtime", "timeout", ...)
    pub static ref CODE_EXECUTIONS: CounterVec = register_counter_vec!(
        "ptc_code_executions_total",
        "Generated programs executed",
        &["language", "status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    pub static ref CODE_EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "ptc_code_execution_duration_seconds",
        "Wall-clock time of generated program runs",
        &["language"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Agent runs by outcome ("completed", "max_iterations", "error", "cancelled").
    pub static ref AGENT_TASKS: CounterVec = register_counter_vec!(
        "ptc_agent_tasks_total",
        "Agent runs by outcome",
        &["status"]
    ).expect("failed to register AGENT_TASKS metric");

    /// Control-loop passes per agent run.
    pub static ref AGENT_ITERATIONS: Histogram = register_histogram!(
        "ptc_agent_iterations",
        "Model calls per agent run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    /// Model call latency, by model name.
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "ptc_llm_call_duration_seconds",
        "Chat model call latency",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        CODE_EXECUTIONS.with_label_values(&["python", "success"]).inc();
        AGENT_TASKS.with_label_values(&["completed"]).inc();
        let text = gather();
        assert!(text.contains("ptc_code_executions_total"));
        assert!(text.contains("ptc_agent_tasks_total"));
    }
}
