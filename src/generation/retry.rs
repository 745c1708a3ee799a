use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{ContentGenerator, GenerationError, LearnerState, Script};
use crate::config::GenerationConfig;
use crate::graph::Entity;

/// Bounded retry with linear backoff: after failed attempt `n` the next
/// attempt waits `n * backoff`. Only transient errors are retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(config.max_attempts, config.backoff())
    }

    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        u32::try_from(attempt)
            .ok()
            .and_then(|n| self.backoff.checked_mul(n))
            .unwrap_or(Duration::MAX)
    }

    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Applies a [`RetryPolicy`] around another generator.
pub struct RetryingGenerator {
    inner: Arc<dyn ContentGenerator>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn ContentGenerator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ContentGenerator for RetryingGenerator {
    async fn generate_script(
        &self,
        node: &Entity,
        objective: &str,
        learner_state: &LearnerState,
    ) -> Result<Script, GenerationError> {
        self.policy
            .run(|| self.inner.generate_script(node, objective, learner_state))
            .await
    }
}
