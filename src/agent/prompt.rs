//! System prompt construction

use crate::executor::{ExecutionLanguage, ToolDefinition};

/// Render the tool catalog, one entry per tool in registration order
pub fn render_tool_catalog(definitions: &[ToolDefinition]) -> String {
    if definitions.is_empty() {
        return "No tools are available.".to_string();
    }

    let mut out = String::from("Available tools:\n");
    for def in definitions {
        out.push_str(&format!("\n- {}\n", def.signature));
        for line in def.description.lines() {
            out.push_str(&format!("    {}\n", line));
        }
    }
    out
}

fn language_notes(language: ExecutionLanguage) -> &'static str {
    match language {
        ExecutionLanguage::Python => {
            "Each tool is a Python function that takes one string argument and returns a string.\n\
             Non-string arguments are JSON-encoded automatically. Parse JSON results with the json module.\n\
             A failing tool raises ToolCallError."
        }
        ExecutionLanguage::Go => {
            "Each tool is a Go function that takes one string argument and returns (string, error).\n\
             Write either a complete program with `package main` or just the body of main; \"fmt\" is imported for you.\n\
             Decode JSON results with encoding/json and check every returned error."
        }
    }
}

/// System prompt with tool catalog, coding guidelines and a format example
///
/// A non-empty `user_prompt` is placed in front, separated by a blank line.
pub fn build_system_prompt(
    user_prompt: Option<&str>,
    language: ExecutionLanguage,
    definitions: &[ToolDefinition],
) -> String {
    let name = language.display_name();
    let tag = language.fence_tag();
    let placeholder = match language {
        ExecutionLanguage::Python => "# Your code here",
        ExecutionLanguage::Go => "// Your code here",
    };

    let base = format!(
        "You are an AI assistant that can write {name} code to solve problems using available tools.\n\
         \n\
         When you need to use tools to answer a question, write {name} code that calls the tools programmatically.\n\
         The code you write will be executed in a separate process with access to all the tools.\n\
         \n\
         {catalog}\n\
         {notes}\n\
         \n\
         IMPORTANT GUIDELINES:\n\
         1. Write complete, executable {name} code\n\
         2. Use the tool functions provided above to call tools\n\
         3. Process and filter data programmatically to extract only relevant information\n\
         4. Print the final result to stdout\n\
         5. Handle errors gracefully\n\
         6. When you have the final answer, respond with just the answer (no code)\n\
         \n\
         Format your code in markdown code blocks:\n\
         ```{tag}\n\
         {placeholder}\n\
         ```",
        catalog = render_tool_catalog(definitions),
        notes = language_notes(language),
    );

    match user_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}\n\n{}", prefix, base),
        None => base,
    }
}
