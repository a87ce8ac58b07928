use crate::{Error, Result};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interval used by timeout based retriers without a custom policy
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Decide from the attempt count and the last error whether to try again, and after how long
pub type RetryPolicy = Arc<dyn Fn(u32, &Error) -> (bool, Duration) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
enum Budget {
    Attempts(u32),
    Timeout(Duration),
}

/// Runs an async operation until it succeeds or its budget is spent
///
/// Holds no state between calls, so a single instance can be shared by every
/// step of a workflow.
#[derive(Clone)]
pub struct Retrier {
    budget: Budget,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("budget", &self.budget)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn fixed(delay: Duration) -> RetryPolicy {
    Arc::new(move |_, _| (true, delay))
}

impl Retrier {
    /// Retry until the total wall clock time exceeds `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Retrier {
        Retrier {
            budget: Budget::Timeout(timeout),
            policy: fixed(DEFAULT_INTERVAL),
            cancel: CancellationToken::new(),
        }
    }

    /// Retry at most `max_attempts` times, sleeping `delay` in between
    #[must_use]
    pub fn with_max_retries(max_attempts: u32, delay: Duration) -> Retrier {
        Retrier {
            budget: Budget::Attempts(max_attempts.max(1)),
            policy: fixed(delay),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_policy<P>(mut self, policy: P) -> Retrier
    where
        P: Fn(u32, &Error) -> (bool, Duration) + Send + Sync + 'static,
    {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Retrier {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            let (again, delay) = (self.policy)(attempt, &err);
            let spent = match self.budget {
                Budget::Attempts(max) => attempt >= max,
                Budget::Timeout(timeout) => start.elapsed() + delay > timeout,
            };
            if !again || spent {
                warn!(operation, attempt, error = %err, "Giving up");
                return Err(Error::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            debug!(
                operation,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
