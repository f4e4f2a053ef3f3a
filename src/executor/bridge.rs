//! Tool bridges injected into generated programs
//!
//! Each bridge defines one function per registered tool. The function posts
//! `{"tool_name", "input"}` to the tool server and returns the `result` field,
//! or raises (Python) / returns (Go) the `error` field. Both bridges speak the
//! same protocol; only the syntax differs.
//!
//! ```text
//! Python: main.py      = bridge preamble + model code
//! Go:     ptc_bridge.go = bridge (package main)
//!         main.go       = model code (wrapped in func main if needed)
//! ```
//!
//! When the tool server cannot be reached at all, the bridge prints
//! [`BRIDGE_UNREACHABLE_MARKER`] to stderr and exits with
//! [`BRIDGE_UNREACHABLE_EXIT_CODE`] so the executor can tell a network failure
//! apart from a failing program. A call that merely times out is reported to
//! the program as a tool error instead.

use std::time::Duration;

use super::ExecutionLanguage;
use crate::tools::protocol::CALL_PATH;
use crate::tools::ToolSet;

/// Exit status used by the bridge when the tool server is unreachable
pub const BRIDGE_UNREACHABLE_EXIT_CODE: i32 = 86;

/// Stderr prefix written by the bridge right before it exits unreachable
pub const BRIDGE_UNREACHABLE_MARKER: &str = "[ptc-bridge] tool server unreachable";

/// Environment variable carrying the tool server base URL into the child
pub const TOOL_SERVER_URL_ENV: &str = "PTC_TOOL_SERVER_URL";

/// Source files making up one runnable program
#[derive(Debug, Clone)]
pub struct Program {
    /// `(file name, contents)` pairs written to the scratch directory
    pub files: Vec<(String, String)>,
    /// File passed to the interpreter or listed first to the compiler
    pub entry: String,
}

/// Compose a runnable program from model code and the tool bridge
pub fn compose(
    language: ExecutionLanguage,
    tools: &ToolSet,
    base_url: &str,
    code: &str,
    call_timeout: Duration,
) -> Program {
    match language {
        ExecutionLanguage::Python => {
            let mut source = python_bridge(tools, base_url, call_timeout);
            source.push_str(code);
            if !code.ends_with('\n') {
                source.push('\n');
            }
            Program {
                files: vec![("main.py".to_string(), source)],
                entry: "main.py".to_string(),
            }
        }
        ExecutionLanguage::Go => Program {
            files: vec![
                ("main.go".to_string(), wrap_go_main(code)),
                ("ptc_bridge.go".to_string(), go_bridge(tools, base_url, call_timeout)),
            ],
            entry: "main.go".to_string(),
        },
    }
}

/// Call signature of a tool function as seen from generated code
pub fn signature(language: ExecutionLanguage, name: &str) -> String {
    match language {
        ExecutionLanguage::Python => format!("{}(input: str) -> str", name),
        ExecutionLanguage::Go => format!("{}(input string) (string, error)", name),
    }
}

/// JSON string literals are valid string literals in both Python and Go
fn literal(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn comment_lines(prefix: &str, text: &str) -> String {
    text.lines()
        .map(|line| format!("{} {}", prefix, line).trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn python_bridge(tools: &ToolSet, base_url: &str, call_timeout: Duration) -> String {
    // Builtins are reached through the module so model code can rebind names
    let mut out = format!(
        r#"# --- tool bridge (generated) ---
import builtins as _ptc_builtins
import json as _ptc_json
import socket as _ptc_socket
import sys as _ptc_sys
import urllib.error as _ptc_urlerror
import urllib.request as _ptc_request

_PTC_CALL_URL = {url}
_PTC_TIMEOUT = {timeout}

# The tool server is on loopback; proxy settings must not apply to it.
_PTC_OPENER = _ptc_request.build_opener(_ptc_request.ProxyHandler({{}}))


class ToolCallError(_ptc_builtins.Exception):
    """Raised when a tool reports a failure or does not answer in time."""


def _ptc_unreachable(err):
    _ptc_builtins.print("{marker}: %s" % (err,), file=_ptc_sys.stderr)
    _ptc_sys.exit({exit_code})


def _ptc_call_tool(tool_name, tool_input=""):
    if not _ptc_builtins.isinstance(tool_input, _ptc_builtins.str):
        tool_input = _ptc_json.dumps(tool_input)
    payload = _ptc_json.dumps({{"tool_name": tool_name, "input": tool_input}}).encode("utf-8")
    request = _ptc_request.Request(
        _PTC_CALL_URL,
        data=payload,
        headers={{"Content-Type": "application/json"}},
        method="POST",
    )
    try:
        with _PTC_OPENER.open(request, timeout=_PTC_TIMEOUT) as response:
            body = response.read()
    except _ptc_urlerror.HTTPError as err:
        body = err.read()
    except _ptc_urlerror.URLError as err:
        if _ptc_builtins.isinstance(err.reason, _ptc_socket.timeout):
            raise ToolCallError("%s: timed out after %ss" % (tool_name, _PTC_TIMEOUT))
        _ptc_unreachable(err.reason)
    except _ptc_socket.timeout:
        raise ToolCallError("%s: timed out after %ss" % (tool_name, _PTC_TIMEOUT))
    except _ptc_builtins.OSError as err:
        _ptc_unreachable(err)
    data = _ptc_json.loads(body.decode("utf-8"))
    if not data.get("success"):
        raise ToolCallError("%s: %s" % (tool_name, data.get("error", "unknown error")))
    return data.get("result", "")

"#,
        url = literal(&format!("{}{}", base_url, CALL_PATH)),
        timeout = call_timeout.as_secs().max(1),
        marker = BRIDGE_UNREACHABLE_MARKER,
        exit_code = BRIDGE_UNREACHABLE_EXIT_CODE,
    );

    for tool in tools.iter() {
        out.push_str(&format!(
            "\n{comment}\ndef {name}(input=\"\"):\n    return _ptc_call_tool({lit}, input)\n\n",
            comment = comment_lines("#", tool.description()),
            name = tool.name(),
            lit = literal(tool.name()),
        ));
    }

    out.push_str("# --- end of tool bridge ---\n\n");
    out
}

fn go_bridge(tools: &ToolSet, base_url: &str, call_timeout: Duration) -> String {
    let mut out = format!(
        r#"// Code generated for tool calling. DO NOT EDIT.

package main

import (
	"bytes"
	"encoding/json"
	"fmt"
	"io"
	"net"
	"net/http"
	"os"
	"time"
)

const ptcCallURL = {url}

type ptcToolResponse struct {{
	Success bool   `json:"success"`
	Result  string `json:"result"`
	Error   string `json:"error"`
	Tool    string `json:"tool"`
	Input   string `json:"input"`
}}

var ptcHTTPClient = &http.Client{{Timeout: {timeout} * time.Second}}

func ptcCallTool(toolName string, input string) (string, error) {{
	payload, err := json.Marshal(map[string]string{{"tool_name": toolName, "input": input}})
	if err != nil {{
		return "", fmt.Errorf("%s: encoding request: %w", toolName, err)
	}}
	resp, err := ptcHTTPClient.Post(ptcCallURL, "application/json", bytes.NewReader(payload))
	if err != nil {{
		if ne, ok := err.(net.Error); ok && ne.Timeout() {{
			return "", fmt.Errorf("%s: timed out after %s", toolName, ptcHTTPClient.Timeout)
		}}
		fmt.Fprintf(os.Stderr, "{marker}: %v\n", err)
		os.Exit({exit_code})
	}}
	defer resp.Body.Close()
	body, err := io.ReadAll(resp.Body)
	if err != nil {{
		return "", fmt.Errorf("%s: reading response: %w", toolName, err)
	}}
	var out ptcToolResponse
	if err := json.Unmarshal(body, &out); err != nil {{
		return "", fmt.Errorf("%s: decoding response: %w", toolName, err)
	}}
	if !out.Success {{
		return "", fmt.Errorf("%s: %s", toolName, out.Error)
	}}
	return out.Result, nil
}}
"#,
        url = literal(&format!("{}{}", base_url, CALL_PATH)),
        timeout = call_timeout.as_secs().max(1),
        marker = BRIDGE_UNREACHABLE_MARKER,
        exit_code = BRIDGE_UNREACHABLE_EXIT_CODE,
    );

    for tool in tools.iter() {
        out.push_str(&format!(
            "\n{comment}\nfunc {name}(input string) (string, error) {{\n\treturn ptcCallTool({lit}, input)\n}}\n",
            comment = comment_lines("//", tool.description()),
            name = tool.name(),
            lit = literal(tool.name()),
        ));
    }

    out
}

/// Model code without a package clause is treated as the body of `main`
fn wrap_go_main(code: &str) -> String {
    let has_package = code
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//"))
        .map(|line| line.starts_with("package "))
        .unwrap_or(false);

    if has_package {
        return code.to_string();
    }

    format!(
        "package main\n\nimport \"fmt\"\n\nvar _ = fmt.Sprint\n\nfunc main() {{\n{}\n}}\n",
        code
    )
}
