//! Throttling retry with exponential backoff.

use std::time::Duration;

use tendril_config::RetryConfig;
use tendril_core::error::ModelError;
use tendril_core::event::{AgentEvent, EventHandler};
use tendril_core::message::Message;
use tendril_core::model::Model;
use tendril_core::tool::ToolSpec;
use tracing::warn;

use crate::streaming::{StreamOutcome, stream_messages};

/// How often, and how patiently, a throttled model call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the `retry`-th retry (1-based): `min(initial * 2^(retry-1), max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Stream one turn, retrying while the model reports throttling.
///
/// Each call starts with a fresh attempt budget. Context overflow and every
/// other failure propagate on the first occurrence; once the budget is spent
/// the last throttling error is returned.
pub async fn stream_with_retry(
    model: &dyn Model,
    system_prompt: Option<&str>,
    messages: &mut [Message],
    tool_specs: &[ToolSpec],
    handler: &dyn EventHandler,
    policy: &RetryPolicy,
) -> Result<StreamOutcome, ModelError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match stream_messages(model, system_prompt, messages, tool_specs, handler).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_throttled() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                let delay_ms = delay.as_millis() as u64;
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    "Throttled by model provider, backing off"
                );
                handler.handle(&AgentEvent::Throttled {
                    error: e.to_string(),
                    attempt,
                    max_attempts: policy.max_attempts,
                    retry_in_ms: delay_ms,
                });
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::EventLog;
    use std::sync::Arc;
    use tendril_providers::ScriptedModel;

    fn throttled() -> ModelError {
        ModelError::Throttled("slow down".into())
    }

    #[test]
    fn delays_double_up_to_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(64));
        assert_eq!(policy.delay_for(7), Duration::from_secs(240));
        assert_eq!(policy.delay_for(40), Duration::from_secs(240));
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 250,
        });
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let model = ScriptedModel::new()
            .then_error(throttled())
            .then_error(throttled())
            .then_text("finally");
        let log = Arc::new(EventLog::default());
        let mut messages = vec![Message::user("hi")];

        let start = tokio::time::Instant::now();
        let outcome = stream_with_retry(
            &model,
            None,
            &mut messages,
            &[],
            log.as_ref(),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.message.text(), "finally");
        assert_eq!(model.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(12));

        let throttles = log.throttles();
        assert_eq!(throttles, vec![(1, 4_000), (2, 8_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error() {
        let model = ScriptedModel::new();
        for i in 0..3 {
            model.push(tendril_providers::ScriptStep::Fail(ModelError::Throttled(
                format!("attempt {i}"),
            )));
        }
        let log = Arc::new(EventLog::default());
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let err = stream_with_retry(
            &model,
            None,
            &mut [Message::user("hi")],
            &[],
            log.as_ref(),
            &policy,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ModelError::Throttled(ref m) if m == "attempt 2"));
        assert_eq!(model.call_count(), 3);
        assert_eq!(log.throttles().len(), 2);
    }

    #[tokio::test]
    async fn overflow_is_not_retried() {
        let model = ScriptedModel::new()
            .then_error(ModelError::ContextWindowOverflow("too long".into()))
            .then_text("unused");

        let err = stream_with_retry(
            &model,
            None,
            &mut [Message::user("hi")],
            &[],
            &tendril_core::event::NullHandler,
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert!(err.is_context_overflow());
        assert_eq!(model.call_count(), 1);
    }
}
