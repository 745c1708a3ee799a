//! Recover a JSON object from LLM output.
//!
//! Models asked for JSON sometimes answer with a bare object, sometimes wrap it
//! in a ```json fence, and sometimes surround it with prose. Each shape is tried
//! in that order.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("Invalid regex pattern"))
}

/// Extract the first JSON object found in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    if let Some(cap) = fenced_block().captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&cap[1]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_object() {
        let value = extract_json(r#"{"guidance": "g"}"#).unwrap();
        assert_eq!(value["guidance"], "g");
    }

    #[test]
    fn test_fenced_object() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json(text).unwrap()["a"], 1);
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let text = "Result: {\"a\": {\"b\": 2}} -- end";
        assert_eq!(extract_json(text).unwrap()["a"]["b"], 2);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
    }
}
