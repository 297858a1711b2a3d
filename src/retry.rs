use anyhow::Result;
use std::future::Future;
use std::time::Duration;

/// Bounded-attempt, fixed-backoff retry policy applied uniformly to model
/// calls and UI submission steps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent, sleeping a
    /// fixed backoff between attempts. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {:#}",
                        label,
                        attempt,
                        self.attempts,
                        e
                    );
                    last_err = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed with no attempts run", label)))
    }
}
