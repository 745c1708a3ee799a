use serde_json::Value;

use super::{GenerationError, LearnerState, Script};
use crate::graph::Entity;
use crate::json::extract_json;

pub const SYSTEM_PROMPT: &str =
    "You are an instructional designer who writes structured, concise teaching scripts.";

/// User prompt asking for a G-P-F script for `node`.
pub fn build_prompt(node: &Entity, objective: &str, learner_state: &LearnerState) -> String {
    let state = serde_json::to_string(learner_state).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"Write a three-part teaching script (Guidance-Presentation-Feedback) for the node below.

Node:
- Name: {name}
- Type: {node_type}
- Definition: {definition}
- Module: {module}
- Difficulty: {difficulty}

Objective: {objective}
Learner state: {state}

1. Guidance: clarify the learning goal, activate prior knowledge, build motivation.
2. Presentation: explain the key concept or skill with supporting examples and the underlying mechanism.
3. Feedback: pose a checkpoint question and name a likely misconception to watch for.

Respond with a JSON object only:
{{"guidance": "...", "presentation": "...", "feedback": "..."}}"#,
        name = node.canonical_name,
        node_type = node.entity_type,
        definition = node.definition,
        module = node.module,
        difficulty = node.difficulty,
        objective = objective,
        state = state,
    )
}

fn required_text(value: &Value, field: &str) -> Result<String, GenerationError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| GenerationError::Malformed(format!("missing `{}`", field)))
}

/// Parse model output into a script. All three parts must be non-empty text.
pub fn parse_script(content: &str) -> Result<Script, GenerationError> {
    let value = extract_json(content).ok_or_else(|| GenerationError::Malformed("no JSON object found".to_string()))?;
    Ok(Script {
        guidance: required_text(&value, "guidance")?,
        presentation: required_text(&value, "presentation")?,
        feedback: required_text(&value, "feedback")?,
    })
}

/// Deterministic script used when generation fails.
pub fn default_script(node: &Entity, objective: &str) -> Script {
    let definition = if node.definition.is_empty() {
        "no definition is available yet"
    } else {
        node.definition.as_str()
    };
    Script {
        guidance: format!(
            "Let's study {}. It is an important part of {}.",
            node.canonical_name, objective
        ),
        presentation: format!("{} ({}): {}", node.canonical_name, node.entity_type, definition),
        feedback: format!(
            "Check: can you explain {} in your own words? What is still unclear?",
            node.canonical_name
        ),
    }
}
