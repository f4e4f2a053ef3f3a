//! Pulling runnable code out of assistant messages

use crate::model::Message;

const FENCE: &str = "```";

/// Code inside the first fenced block, excluding the opening line
///
/// Returns `None` when there is no complete fence or the block is empty.
pub fn extract_from_code_block(text: &str) -> Option<&str> {
    let open = text.find(FENCE)?;
    let after_open = open + FENCE.len();
    let start = after_open + text[after_open..].find('\n')? + 1;
    let end = start + text[start..].find(FENCE)?;
    if end > start {
        Some(&text[start..end])
    } else {
        None
    }
}

/// Code to run for an assistant message
///
/// Tried in order on the first text part: a fenced block, a JSON object
/// with a string `code` field, then the raw text.
pub fn extract_code(message: &Message) -> Option<String> {
    let text = message.text_parts().next()?;

    if let Some(code) = extract_from_code_block(text) {
        return Some(code.to_string());
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(serde_json::Value::String(code)) = map.get("code") {
            return Some(code.clone());
        }
    }

    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// True when any text part opens a ```python or ```go fence
pub fn contains_code(message: &Message) -> bool {
    message.text_parts().any(|text| {
        let lower = text.to_lowercase();
        lower.contains("```python") || lower.contains("```go")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Part, Role};

    #[test]
    fn test_fence_ignores_surrounding_prose() {
        let text = "Let me compute that.\n```python\nprint(calculator('2+2'))\n```\nThe tool does the math.";
        assert_eq!(
            extract_from_code_block(text),
            Some("print(calculator('2+2'))\n")
        );
        let msg = Message::assistant(text);
        assert_eq!(extract_code(&msg).unwrap(), "print(calculator('2+2'))\n");
    }

    #[test]
    fn test_untagged_fence() {
        assert_eq!(extract_from_code_block("```\nx = 1\n```"), Some("x = 1\n"));
    }

    #[test]
    fn test_unclosed_fence_falls_back_to_raw_text() {
        let msg = Message::assistant("```python\nprint(1)");
        assert_eq!(extract_code(&msg).unwrap(), "```python\nprint(1)");
    }

    #[test]
    fn test_json_code_field() {
        let msg = Message::assistant(r#"{"code": "print('hi')", "language": "python"}"#);
        assert_eq!(extract_code(&msg).unwrap(), "print('hi')");
    }

    #[test]
    fn test_json_without_code_field_is_raw() {
        let raw = r#"{"answer": 4}"#;
        assert_eq!(extract_code(&Message::assistant(raw)).unwrap(), raw);
    }

    #[test]
    fn test_nothing_to_extract() {
        assert_eq!(extract_code(&Message::assistant("   ")), None);
        assert_eq!(extract_code(&Message::with_parts(Role::Assistant, vec![])), None);
    }

    #[test]
    fn test_first_text_part_wins() {
        let msg = Message::with_parts(
            Role::Assistant,
            vec![Part::text("```go\nfmt.Println(1)\n```"), Part::text("```python\nprint(2)\n```")],
        );
        assert_eq!(extract_code(&msg).unwrap(), "fmt.Println(1)\n");
    }

    #[test]
    fn test_contains_code_is_case_insensitive() {
        assert!(contains_code(&Message::assistant("```Python\nprint(1)\n```")));
        assert!(contains_code(&Message::assistant("```GO\nfmt.Println(1)\n```")));
        assert!(!contains_code(&Message::assistant("```\nplain\n```")));
        assert!(!contains_code(&Message::assistant("The answer is 4.")));
    }
}
