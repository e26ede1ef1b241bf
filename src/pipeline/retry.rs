use std::time::Duration;
use tokio::time::sleep;

/// Default number of attempts for a record or a checkpoint cycle
pub const NUM_RETRIES: u32 = 10;

/// Default pause between attempts
pub const BACKOFF_TIME: Duration = Duration::from_millis(3_000);

/// Bounded retry with a fixed backoff
///
/// Shared by the record dispatcher and the checkpoint manager. The backoff
/// suspends only the shard loop that owns the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NUM_RETRIES,
            backoff: BACKOFF_TIME,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Same attempt budget without pausing between attempts
    pub fn without_backoff(self) -> Self {
        Self {
            backoff: Duration::ZERO,
            ..self
        }
    }

    /// `attempt` is 1-based
    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub async fn pause(&self) {
        if !self.backoff.is_zero() {
            sleep(self.backoff).await;
        }
    }
}
