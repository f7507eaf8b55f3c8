use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use backon::{ExponentialBuilder, Retryable};

/// Exponential backoff applied to flaky identity-provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(20),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = self.max_delay.max(delay);
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }

    /// Run `op` until it succeeds or the attempt budget is spent. The error of
    /// the last attempt is returned as is.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .notify(|err: &anyhow::Error, delay: Duration| {
                tracing::warn!(
                    operation = label,
                    delay_ms = delay.as_millis() as u64,
                    "retry: attempt failed: {:#}",
                    err
                );
            })
            .await
    }
}
