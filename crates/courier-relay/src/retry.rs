//! Bounded retry around the agent invocation.

use crate::backend::{AgentBackend, ItemStream};
use crate::error::{BackendError, InvocationError};
use courier_types::InvocationRequest;
use std::time::Duration;

/// Failure categories the backend uses for infrastructure hiccups.
/// Matched case-insensitively against the cause and message.
const TRANSIENT_CAUSES: [&str; 2] = ["internalserverexception", "dependencyfailedexception"];

/// Default number of invocation attempts, the first call included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default wait before the first retry; doubles for each later one.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Classifies a backend failure by the category it signals.
pub fn classify_failure(error: &BackendError) -> FailureClass {
    let cause = error.cause.to_ascii_lowercase();
    let message = error.message.to_ascii_lowercase();
    let transient = TRANSIENT_CAUSES
        .iter()
        .any(|needle| cause.contains(needle) || message.contains(needle));
    if transient {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included. Zero behaves as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (counted from 1): `base`,
    /// `2 * base`, `4 * base`, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Invokes the agent, retrying transient failures with exponential backoff.
///
/// The backoff sleep suspends only the calling task. Nothing is pushed to
/// the client here, so a failure can be reported without partial output.
pub async fn invoke_with_retry(
    backend: &dyn AgentBackend,
    request: &InvocationRequest,
    policy: &RetryPolicy,
) -> Result<ItemStream, InvocationError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match backend.invoke(request).await {
            Ok(stream) => {
                tracing::debug!(attempt, "agent invocation accepted, streaming response");
                return Ok(stream);
            }
            Err(error) => error,
        };

        let class = classify_failure(&error);
        tracing::warn!(
            attempt,
            max_attempts,
            cause = %error.cause,
            class = ?class,
            "agent invocation failed: {}",
            error.message
        );

        match class {
            FailureClass::Permanent => {
                return Err(InvocationError::Permanent {
                    attempts: attempt,
                    source: error,
                })
            }
            FailureClass::Transient if attempt >= max_attempts => {
                tracing::error!(attempts = attempt, "agent invocation retry budget exhausted");
                return Err(InvocationError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }
            FailureClass::Transient => {
                let delay = policy.delay_after(attempt);
                tracing::info!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "retrying agent invocation after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
