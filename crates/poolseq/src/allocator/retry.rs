use super::SequenceAllocator;
use crate::{DistributedLock, DurableCounter, Error, Result, SharedCache};
use core::time::Duration;
use tracing::debug;

/// Exponential backoff for retryable allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

impl<C, L, D> SequenceAllocator<C, L, D>
where
    C: SharedCache,
    L: DistributedLock + 'static,
    D: DurableCounter,
{
    /// [`Self::next_id`] with retries on retryable failures.
    ///
    /// # Errors
    ///
    /// Non-retryable errors are returned as-is on first sight. When every
    /// attempt fails with a retryable error, returns
    /// [`Error::MaxRetriesExceeded`] carrying the last one.
    pub async fn next_id_with_retry(&self, policy: &RetryPolicy) -> Result<u64> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.next_id().await {
                Ok(id) => return Ok(id),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(Error::MaxRetriesExceeded {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let backoff = policy.backoff(attempt);
                    debug!(attempt, ?backoff, error = %e, "retrying id allocation");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(50));
    }
}
