use crate::error::BrokerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts made before giving up
    pub max_attempts: u32,
    /// Delay after a failed attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is reached.
    ///
    /// Each failure is logged with its class and the attempt counter. No
    /// delay follows the final attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, BrokerError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "{} succeeded after retrying", label);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts,
                        class = failure_class(&err),
                        "{} failed: {}",
                        label,
                        err
                    );

                    if attempt < max_attempts {
                        info!(attempt, "Retrying {} in {:?}", label, self.delay);
                        sleep(self.delay).await;
                    }
                }
            }
        }

        error!(
            attempts = max_attempts,
            "{} failed after {} attempts, giving up", label, max_attempts
        );
        Err(BrokerError::Exhausted {
            attempts: max_attempts,
        })
    }
}

fn failure_class(err: &BrokerError) -> &'static str {
    match err {
        BrokerError::Tls { .. } => "tls",
        BrokerError::Transport { .. } => "transport",
        BrokerError::Protocol { .. } => "protocol",
        BrokerError::Exhausted { .. } => "exhausted",
    }
}
