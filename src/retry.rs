//! Retry policy, backoff schedules, and the pluggable retry customizer.

use crate::error::RestError;
use crate::node::Service;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(50);

/// Default cap applied to every backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(2500);

/// Default number of attempts per request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Shape of the backoff schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffAlgorithm {
    /// Delays grow along the Fibonacci sequence: 1, 1, 2, 3, 5, ... times
    /// the minimum delay.
    #[default]
    Fibonacci,
    /// Delays double on every attempt.
    Exponential,
    /// Delays grow by the minimum delay on every attempt.
    Linear,
}

/// The retry discipline applied by the request engine.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub algorithm: BackoffAlgorithm,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            algorithm: BackoffAlgorithm::default(),
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the given 1-indexed attempt fails, clamped to
    /// `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = match self.algorithm {
            BackoffAlgorithm::Fibonacci => fibonacci(attempt),
            BackoffAlgorithm::Exponential => 2u64.saturating_pow(attempt.saturating_sub(1)),
            BackoffAlgorithm::Linear => u64::from(attempt),
        };

        let factor = u32::try_from(factor).unwrap_or(u32::MAX);

        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut previous, mut current) = (0u64, 1u64);
    for _ in 0..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }

    previous
}

/// Per-attempt context handed to retry customizers. Cancellation rides the
/// task: dropping the future aborts the attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    /// 1-indexed attempt number.
    pub attempt: u32,
}

/// Hook into the engine's retry loop.
///
/// Every method receives the decision the engine would make on its own and
/// has the final say; `host_for_attempt` may redirect the next attempt to a
/// specific host, which lets bootstrap-style flows reuse the retry loop
/// without forking it.
#[async_trait]
pub trait RetryCustomizer: Send + Sync {
    /// Final say on retrying after a transport-level error.
    async fn retry_with_error(
        &self,
        _ctx: &RetryContext,
        default_decision: bool,
        _err: &RestError,
    ) -> bool {
        default_decision
    }

    /// Final say on retrying after an unexpected status code.
    async fn retry_with_response(
        &self,
        _ctx: &RetryContext,
        default_decision: bool,
        _status: StatusCode,
    ) -> bool {
        default_decision
    }

    /// Target host for the attempt; `None` defers to standard host
    /// selection against the cluster config.
    async fn host_for_attempt(&self, _ctx: &RetryContext, _service: Service) -> Option<String> {
        None
    }
}

/// The engine's standard behaviour, unchanged.
#[derive(Debug, Default)]
pub struct DefaultRetryCustomizer;

#[async_trait]
impl RetryCustomizer for DefaultRetryCustomizer {}

/// Pins every attempt to a single host. Used while bootstrapping and while
/// refreshing the cluster config from a specific node, where the config
/// either does not exist yet or is suspected stale.
pub struct FixedHostCustomizer {
    host: String,
    bootstrap: bool,
}

impl FixedHostCustomizer {
    pub fn new(host: impl Into<String>) -> Self {
        FixedHostCustomizer {
            host: host.into(),
            bootstrap: false,
        }
    }

    /// Marks the attempts as bootstrap-time, relaxing the unknown-authority
    /// retry rule.
    pub fn for_bootstrap(host: impl Into<String>) -> Self {
        FixedHostCustomizer {
            host: host.into(),
            bootstrap: true,
        }
    }
}

#[async_trait]
impl RetryCustomizer for FixedHostCustomizer {
    async fn retry_with_error(
        &self,
        _ctx: &RetryContext,
        default_decision: bool,
        err: &RestError,
    ) -> bool {
        default_decision || err.should_retry(self.bootstrap)
    }

    async fn host_for_attempt(&self, _ctx: &RetryContext, _service: Service) -> Option<String> {
        Some(self.host.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(algorithm: BackoffAlgorithm) -> RetryPolicy {
        RetryPolicy {
            algorithm,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(2500),
            max_retries: 3,
        }
    }

    #[test]
    fn fibonacci_delays() {
        let policy = policy(BackoffAlgorithm::Fibonacci);
        let delays: Vec<u64> = (1..=7)
            .map(|attempt| policy.delay(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![50, 50, 100, 150, 250, 400, 650]);
    }

    #[test]
    fn exponential_delays() {
        let policy = policy(BackoffAlgorithm::Exponential);
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| policy.delay(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![50, 100, 200, 400, 800]);
    }

    #[test]
    fn linear_delays() {
        let policy = policy(BackoffAlgorithm::Linear);
        let delays: Vec<u64> = (1..=4)
            .map(|attempt| policy.delay(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![50, 100, 150, 200]);
    }

    #[test]
    fn delays_are_clamped_to_the_maximum() {
        let policy = policy(BackoffAlgorithm::Exponential);
        assert_eq!(policy.delay(20), Duration::from_millis(2500));

        // Large attempt numbers must not overflow.
        assert_eq!(policy.delay(500), Duration::from_millis(2500));
    }
}
