//! Per-node G-P-F (Guidance / Presentation / Feedback) script generation.

mod openai;
mod prompt;
mod retry;

pub use openai::ChatScriptGenerator;
pub use prompt::{build_prompt, default_script, parse_script, SYSTEM_PROMPT};
pub use retry::{RetryPolicy, RetryingGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::graph::Entity;

/// Free-form learner snapshot passed through to the generator.
pub type LearnerState = BTreeMap<String, Value>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("request failed: {0}")]
    Request(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Timeout | GenerationError::RateLimited | GenerationError::Request(_) => true,
            GenerationError::Server { status, .. } => *status >= 500,
            GenerationError::Malformed(_) => false,
        }
    }
}

/// Three-part instructional script for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub guidance: String,
    pub presentation: String,
    pub feedback: String,
}

/// Content-generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_script(
        &self,
        node: &Entity,
        objective: &str,
        learner_state: &LearnerState,
    ) -> Result<Script, GenerationError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails every call with the given error.
    pub struct FailingGenerator {
        pub error: GenerationError,
        pub calls: AtomicUsize,
    }

    impl FailingGenerator {
        pub fn new(error: GenerationError) -> Self {
            Self {
                error,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContentGenerator for FailingGenerator {
        async fn generate_script(&self, _: &Entity, _: &str, _: &LearnerState) -> Result<Script, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    /// Echoes the node name, optionally sleeping per node so completions arrive out of order.
    #[derive(Default)]
    pub struct EchoGenerator {
        pub delays: HashMap<String, Duration>,
        pub fail_for: Vec<String>,
        pub seen: Mutex<Vec<String>>,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl EchoGenerator {
        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContentGenerator for EchoGenerator {
        async fn generate_script(
            &self,
            node: &Entity,
            objective: &str,
            _: &LearnerState,
        ) -> Result<Script, GenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(node.canonical_name.clone());

            if let Some(delay) = self.delays.get(&node.canonical_name) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.contains(&node.canonical_name) {
                return Err(GenerationError::Malformed("no JSON object found".to_string()));
            }
            Ok(Script {
                guidance: format!("G:{}", node.canonical_name),
                presentation: format!("P:{}", objective),
                feedback: format!("F:{}", node.canonical_name),
            })
        }
    }

    /// Returns queued results in order, then succeeds.
    pub struct ScriptedGenerator {
        results: Mutex<Vec<Result<Script, GenerationError>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        pub fn new(mut results: Vec<Result<Script, GenerationError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub fn script(tag: &str) -> Script {
        Script {
            guidance: format!("{} guidance", tag),
            presentation: format!("{} presentation", tag),
            feedback: format!("{} feedback", tag),
        }
    }

    #[async_trait]
    impl ContentGenerator for ScriptedGenerator {
        async fn generate_script(&self, _: &Entity, _: &str, _: &LearnerState) -> Result<Script, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results.lock().unwrap().pop().unwrap_or_else(|| Ok(script("fallthrough")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::Timeout.is_transient());
        assert!(GenerationError::RateLimited.is_transient());
        assert!(GenerationError::Server { status: 503, body: String::new() }.is_transient());
        assert!(!GenerationError::Server { status: 400, body: String::new() }.is_transient());
        assert!(!GenerationError::Malformed("x".to_string()).is_transient());
    }
}
