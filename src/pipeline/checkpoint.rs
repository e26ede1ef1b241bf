//! Periodic checkpoint commits with per-failure handling
//!
//! A commit cycle runs at most once per checkpoint interval, after a batch
//! has been processed. Failures are reported as a closed [`CheckpointOutcome`]
//! so each kind gets its own policy:
//!
//! | outcome          | handling                                  |
//! |------------------|-------------------------------------------|
//! | `Success`        | done                                      |
//! | `ShutdownSignal` | done, another worker owns the shard       |
//! | `Throttled`      | back off and retry up to the retry budget |
//! | `StorageError`   | give up for this cycle, no retry          |

use super::retry::RetryPolicy;
use super::types::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Default spacing between commit cycles
pub const CHECKPOINT_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Success,
    /// This processor no longer owns the shard
    ShutdownSignal,
    /// Transient pressure on the checkpoint store
    Throttled(String),
    /// Persistent storage problem that retrying cannot fix
    StorageError(String),
}

/// Commit side of the stream substrate
#[async_trait]
pub trait Checkpointer: Send {
    /// Commit progress up to the last record handed to the dispatcher
    async fn checkpoint(&mut self) -> CheckpointOutcome;
}

/// How a commit cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointCycle {
    Committed { attempts: u32 },
    Superseded { attempts: u32 },
    Exhausted { attempts: u32 },
    StorageFailed { attempts: u32 },
}

impl CheckpointCycle {
    pub fn attempts(&self) -> u32 {
        match self {
            CheckpointCycle::Committed { attempts }
            | CheckpointCycle::Superseded { attempts }
            | CheckpointCycle::Exhausted { attempts }
            | CheckpointCycle::StorageFailed { attempts } => *attempts,
        }
    }
}

pub struct CheckpointManager {
    shard_id: String,
    interval: Duration,
    retry: RetryPolicy,
    next_deadline: Option<DateTime<Utc>>,
    clock: Clock,
}

impl CheckpointManager {
    pub fn new(shard_id: impl Into<String>, interval: Duration, retry: RetryPolicy, clock: Clock) -> Self {
        Self {
            shard_id: shard_id.into(),
            interval,
            retry,
            next_deadline: None,
            clock,
        }
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_deadline
    }

    /// Run a commit cycle if the deadline has passed
    ///
    /// Called once per processed batch. The deadline moves forward after
    /// every cycle, whatever its outcome.
    pub async fn after_batch<C: Checkpointer + ?Sized>(&mut self, checkpointer: &mut C) -> Option<CheckpointCycle> {
        let now = (self.clock)();
        if let Some(deadline) = self.next_deadline {
            if now <= deadline {
                return None;
            }
        }

        let cycle = self.commit_cycle(checkpointer).await;
        self.next_deadline = Some((self.clock)() + self.interval);
        Some(cycle)
    }

    /// Commit regardless of the deadline (end of shard)
    pub async fn force<C: Checkpointer + ?Sized>(&mut self, checkpointer: &mut C) -> CheckpointCycle {
        let cycle = self.commit_cycle(checkpointer).await;
        self.next_deadline = Some((self.clock)() + self.interval);
        cycle
    }

    async fn commit_cycle<C: Checkpointer + ?Sized>(&mut self, checkpointer: &mut C) -> CheckpointCycle {
        log::info!("💾 Checkpointing shard {}", self.shard_id);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match checkpointer.checkpoint().await {
                CheckpointOutcome::Success => {
                    log::debug!("✅ Checkpoint committed for shard {} (attempt {})", self.shard_id, attempt);
                    return CheckpointCycle::Committed { attempts: attempt };
                }
                CheckpointOutcome::ShutdownSignal => {
                    log::info!(
                        "Shard {} is owned by another processor, skipping checkpoint",
                        self.shard_id
                    );
                    return CheckpointCycle::Superseded { attempts: attempt };
                }
                CheckpointOutcome::StorageError(message) => {
                    log::error!(
                        "❌ Cannot save checkpoint for shard {}: {} (check the checkpoint store)",
                        self.shard_id,
                        message
                    );
                    return CheckpointCycle::StorageFailed { attempts: attempt };
                }
                CheckpointOutcome::Throttled(message) => {
                    if self.retry.is_last_attempt(attempt) {
                        log::error!(
                            "❌ Checkpoint for shard {} failed after {} attempts: {}",
                            self.shard_id,
                            attempt,
                            message
                        );
                        return CheckpointCycle::Exhausted { attempts: attempt };
                    }
                    log::info!(
                        "⏳ Transient issue when checkpointing shard {} - attempt {} of {}: {}",
                        self.shard_id,
                        attempt,
                        self.retry.max_attempts,
                        message
                    );
                    self.retry.pause().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    struct ScriptedCheckpointer {
        script: VecDeque<CheckpointOutcome>,
        fallback: CheckpointOutcome,
        calls: u32,
    }

    impl ScriptedCheckpointer {
        fn new(script: Vec<CheckpointOutcome>, fallback: CheckpointOutcome) -> Self {
            Self {
                script: script.into(),
                fallback,
                calls: 0,
            }
        }
    }

    #[async_trait]
    impl Checkpointer for ScriptedCheckpointer {
        async fn checkpoint(&mut self) -> CheckpointOutcome {
            self.calls += 1;
            self.script.pop_front().unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn test_clock() -> (Clock, Arc<AtomicI64>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp();
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || Utc.timestamp_opt(handle.load(Ordering::SeqCst), 0).unwrap());
        (clock, now)
    }

    fn manager(clock: Clock) -> CheckpointManager {
        CheckpointManager::new(
            "shard-0",
            Duration::seconds(CHECKPOINT_INTERVAL_SECS),
            RetryPolicy::default().without_backoff(),
            clock,
        )
    }

    #[tokio::test]
    async fn test_first_batch_commits_then_waits_for_deadline() {
        let (clock, now) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer = ScriptedCheckpointer::new(vec![], CheckpointOutcome::Success);

        assert_eq!(
            manager.after_batch(&mut checkpointer).await,
            Some(CheckpointCycle::Committed { attempts: 1 })
        );

        // Continuous traffic for the next minute does not commit again
        for _ in 0..60 {
            now.fetch_add(1, Ordering::SeqCst);
            assert_eq!(manager.after_batch(&mut checkpointer).await, None);
        }
        assert_eq!(checkpointer.calls, 1);

        now.fetch_add(1, Ordering::SeqCst);
        assert!(manager.after_batch(&mut checkpointer).await.is_some());
        assert_eq!(checkpointer.calls, 2);
    }

    #[tokio::test]
    async fn test_throttling_retries_until_success() {
        let (clock, _) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer = ScriptedCheckpointer::new(
            vec![
                CheckpointOutcome::Throttled("busy".to_string()),
                CheckpointOutcome::Throttled("busy".to_string()),
            ],
            CheckpointOutcome::Success,
        );

        let cycle = manager.force(&mut checkpointer).await;
        assert_eq!(cycle, CheckpointCycle::Committed { attempts: 3 });
    }

    #[tokio::test]
    async fn test_throttling_gives_up_after_budget() {
        let (clock, _) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer =
            ScriptedCheckpointer::new(vec![], CheckpointOutcome::Throttled("busy".to_string()));

        let cycle = manager.after_batch(&mut checkpointer).await;
        assert_eq!(cycle, Some(CheckpointCycle::Exhausted { attempts: 10 }));
        assert_eq!(checkpointer.calls, 10);
        assert!(manager.next_deadline().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_immediately() {
        let (clock, _) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer = ScriptedCheckpointer::new(
            vec![
                CheckpointOutcome::Throttled("busy".to_string()),
                CheckpointOutcome::ShutdownSignal,
            ],
            CheckpointOutcome::Success,
        );

        let cycle = manager.force(&mut checkpointer).await;
        assert_eq!(cycle, CheckpointCycle::Superseded { attempts: 2 });
        assert_eq!(checkpointer.calls, 2);
    }

    #[tokio::test]
    async fn test_storage_error_is_not_retried() {
        let (clock, _) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer = ScriptedCheckpointer::new(
            vec![],
            CheckpointOutcome::StorageError("no such table".to_string()),
        );

        let cycle = manager.force(&mut checkpointer).await;
        assert_eq!(cycle, CheckpointCycle::StorageFailed { attempts: 1 });
        assert_eq!(checkpointer.calls, 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_still_moves_deadline() {
        let (clock, now) = test_clock();
        let mut manager = manager(clock);
        let mut checkpointer = ScriptedCheckpointer::new(
            vec![],
            CheckpointOutcome::StorageError("disk I/O error".to_string()),
        );

        manager.after_batch(&mut checkpointer).await;
        now.fetch_add(30, Ordering::SeqCst);
        assert_eq!(manager.after_batch(&mut checkpointer).await, None);
        assert_eq!(checkpointer.calls, 1);
    }
}
