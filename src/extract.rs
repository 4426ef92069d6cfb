//! Best-effort recovery of assistant text from heterogeneous response bodies.
//!
//! Providers disagree on response shape, so the body is parsed into a generic JSON tree and a
//! fixed ladder of path lookups is applied, falling back to fenced code blocks and finally to the
//! raw text itself.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::LLMError;

/// Minimal match of a triple-backtick block with an optional `json` tag.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fenced block pattern is valid")
});

/// Paths tried inside `choices[0]`, in priority order.
const CHOICE_PATHS: [&[&str]; 3] = [&["message", "content"], &["content"], &["text"]];

/// Top-level fields tried when no choice matched, in priority order.
const TOP_LEVEL_FIELDS: [&str; 3] = ["content", "text", "output"];

/// Extracts the assistant text from a raw response body.
///
/// # Examples
///
/// ```
/// use llm_relay::extract::extract_content;
///
/// let body = br#"{"choices":[{"message":{"content":"Hello"}}]}"#;
/// assert_eq!(extract_content(body).unwrap(), "Hello");
///
/// let fenced = b"```json\n{\"content\":\"X\"}\n```";
/// assert_eq!(extract_content(fenced).unwrap(), "X");
///
/// assert_eq!(extract_content(b"just words").unwrap(), "just words");
/// ```
///
/// # Errors
///
/// Returns [`LLMError::Reported`] when the body carries a non-empty top-level `error`, and
/// [`LLMError::Extraction`] when no interpretation yields text.
pub fn extract_content(body: &[u8]) -> Result<String, LLMError> {
    extract_from_text(&String::from_utf8_lossy(body))
}

/// Same ladder as [`extract_content`], starting from already decoded text.
pub fn extract_from_text(text: &str) -> Result<String, LLMError> {
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(message) = reported_error(&value) {
            return Err(LLMError::Reported { message });
        }
        if let Some(content) = structured_content(&value) {
            return Ok(content.to_string());
        }
    }

    if let Some(captures) = FENCED_BLOCK.captures(text) {
        let inner = captures.get(1).map_or("", |m| m.as_str());
        return Ok(extract_from_text(inner).unwrap_or_else(|_| inner.to_string()));
    }

    if !text.is_empty() && !text.starts_with('{') {
        return Ok(text.to_string());
    }

    Err(LLMError::Extraction {
        message: "failed to extract content".to_string(),
    })
}

/// Provider-reported error carried by the top-level `error` field.
///
/// A plain string is taken as is; an object contributes its `message` field.
fn reported_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(message) if !message.is_empty() => Some(message.clone()),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn structured_content(value: &Value) -> Option<&str> {
    let first_choice = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first());

    if let Some(choice) = first_choice {
        if let Some(text) = CHOICE_PATHS
            .iter()
            .find_map(|path| non_empty_str(lookup(choice, path)))
        {
            return Some(text);
        }
    }

    TOP_LEVEL_FIELDS
        .iter()
        .find_map(|field| non_empty_str(value.get(*field)))
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(*key))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|text| !text.is_empty())
}

/// Incremental content of one streamed frame: `choices[0].delta.content`.
///
/// Returns `None` when the frame is not JSON or the path is absent.
pub fn extract_delta(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    let choice = value.get("choices")?.as_array()?.first()?;
    lookup(choice, &["delta", "content"])
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str) -> Result<String, LLMError> {
        extract_content(body.as_bytes())
    }

    #[test]
    fn error_field_wins_over_choices() {
        let err = extract(r#"{"error":"quota exceeded","choices":[{"message":{"content":"hi"}}]}"#)
            .expect_err("error must win");
        match err {
            LLMError::Reported { message } => assert_eq!(message, "quota exceeded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_object_message_is_reported() {
        let err = extract(r#"{"error":{"message":"bad model","code":404}}"#).expect_err("error");
        assert_eq!(err.to_string(), "bad model");
    }

    #[test]
    fn empty_error_is_ignored() {
        assert_eq!(extract(r#"{"error":"","content":"ok"}"#).unwrap(), "ok");
    }

    #[test]
    fn choice_shapes_follow_priority_order() {
        assert_eq!(
            extract(r#"{"choices":[{"message":{"content":"a"},"content":"b","text":"c"}]}"#).unwrap(),
            "a"
        );
        assert_eq!(
            extract(r#"{"choices":[{"message":{"content":""},"content":"b","text":"c"}]}"#).unwrap(),
            "b"
        );
        assert_eq!(extract(r#"{"choices":[{"text":"c"}]}"#).unwrap(), "c");
    }

    #[test]
    fn only_first_choice_is_considered() {
        assert_eq!(
            extract(r#"{"choices":[{"index":0},{"text":"second"}],"output":"top"}"#).unwrap(),
            "top"
        );
    }

    #[test]
    fn top_level_fields_follow_priority_order() {
        assert_eq!(extract(r#"{"content":"a","text":"b","output":"c"}"#).unwrap(), "a");
        assert_eq!(extract(r#"{"text":"b","output":"c"}"#).unwrap(), "b");
        assert_eq!(extract(r#"{"output":"c"}"#).unwrap(), "c");
        assert_eq!(extract(r#"{"choices":[],"output":"c"}"#).unwrap(), "c");
    }

    #[test]
    fn non_string_fields_do_not_match() {
        let err = extract(r#"{"content":["x"],"text":42}"#).expect_err("no text");
        assert!(matches!(err, LLMError::Extraction { .. }));
    }

    #[test]
    fn fenced_json_is_parsed_recursively() {
        assert_eq!(extract("```json\n{\"content\":\"X\"}\n```").unwrap(), "X");
        assert_eq!(
            extract("Here you go:\n```\n{\"choices\":[{\"text\":\"Y\"}]}\n```\nbye").unwrap(),
            "Y"
        );
    }

    #[test]
    fn fenced_plain_text_is_returned_verbatim() {
        assert_eq!(extract("```\nplain answer\n```").unwrap(), "plain answer");
    }

    #[test]
    fn fenced_unusable_json_falls_back_to_inner_text() {
        assert_eq!(extract("```json\n{\"foo\":1}\n```").unwrap(), "{\"foo\":1}");
    }

    #[test]
    fn fenced_error_still_returns_inner_text() {
        assert_eq!(
            extract("```json\n{\"error\":\"nope\"}\n```").unwrap(),
            "{\"error\":\"nope\"}"
        );
    }

    #[test]
    fn fence_match_is_minimal() {
        assert_eq!(extract("```\nfirst\n``` middle ```\nsecond\n```").unwrap(), "first");
    }

    #[test]
    fn plain_text_is_returned_trimmed() {
        assert_eq!(extract("  The answer is 4.\n").unwrap(), "The answer is 4.");
    }

    #[test]
    fn unmatched_json_object_fails() {
        let err = extract(r#"{"id":"x","choices":[{"message":{"role":"assistant"}}]}"#)
            .expect_err("nothing to extract");
        assert!(matches!(err, LLMError::Extraction { .. }));
    }

    #[test]
    fn broken_json_object_fails() {
        assert!(extract("{\"content\": ").is_err());
        assert!(extract("   ").is_err());
    }

    #[test]
    fn delta_is_read_from_first_choice() {
        assert_eq!(
            extract_delta(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#),
            Some("Hi".to_string())
        );
        assert_eq!(extract_delta(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(extract_delta(r#"{"choices":[]}"#), None);
        assert_eq!(extract_delta("{not json"), None);
    }
}
