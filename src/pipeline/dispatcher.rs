//! Per-shard record dispatcher
//!
//! Drives every delivered record through classify → resolve → score →
//! (optional) emit, retrying the whole unit on failure and skipping records
//! that keep failing so one bad record never blocks the shard.
//!
//! ```text
//! Pending → Processing ─┬→ Success
//!              ↑        ├→ Retrying ─(backoff)─┐
//!              └────────┼──────────────────────┘
//!                       └→ Exhausted (record skipped)
//! ```

use super::checkpoint::{CheckpointCycle, CheckpointManager, Checkpointer};
use super::classifier::{classify, Classification};
use super::emitter::TagEmitter;
use super::errors::ProcessingError;
use super::profiles::ProfileStore;
use super::retry::RetryPolicy;
use super::types::{Clock, StreamRecord};
use chrono::Duration;
use std::sync::Arc;

/// Why a shard processor is being shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// End of shard reached; progress must be committed
    Terminate,
    /// Ownership lost to another processor; do not commit
    Zombie,
}

/// What one successful processing attempt did with a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDisposition {
    /// Visit recorded and the identity was tagged as a frequent visitor
    Tagged,
    /// Visit recorded, identity below the threshold
    Scored,
    /// Not a visit, or a visit without any identity
    Ignored,
    /// Payload could not be decoded; dropped without retry
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Processed {
        disposition: RecordDisposition,
        attempts: u32,
    },
    /// Retry budget exhausted, record skipped
    Abandoned { attempts: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub tagged: u64,
    pub scored: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub abandoned: u64,
    pub retries: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Processed { disposition, attempts } => {
                self.retries += u64::from(attempts.saturating_sub(1));
                match disposition {
                    RecordDisposition::Tagged => self.tagged += 1,
                    RecordDisposition::Scored => self.scored += 1,
                    RecordDisposition::Ignored => self.ignored += 1,
                    RecordDisposition::Malformed => self.malformed += 1,
                }
            }
            RecordOutcome::Abandoned { attempts } => {
                self.retries += u64::from(attempts.saturating_sub(1));
                self.abandoned += 1;
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.tagged + self.scored + self.ignored + self.malformed + self.abandoned
    }
}

/// Record processor for one shard lease
pub struct RecordDispatcher {
    shard_id: String,
    store: Arc<ProfileStore>,
    emitter: TagEmitter,
    retry: RetryPolicy,
    checkpoints: CheckpointManager,
    stats: DispatchStats,
}

impl RecordDispatcher {
    pub fn new(
        shard_id: impl Into<String>,
        store: Arc<ProfileStore>,
        emitter: TagEmitter,
        retry: RetryPolicy,
        checkpoint_interval: Duration,
        clock: Clock,
    ) -> Self {
        let shard_id = shard_id.into();
        log::info!("Initializing record processor for shard: {}", shard_id);
        Self {
            checkpoints: CheckpointManager::new(shard_id.clone(), checkpoint_interval, retry, clock),
            shard_id,
            store,
            emitter,
            retry,
            stats: DispatchStats::default(),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Process a delivered batch, then checkpoint if the interval elapsed
    ///
    /// Returns the commit cycle when one ran.
    pub async fn process_records<C: Checkpointer + ?Sized>(
        &mut self,
        records: &[StreamRecord],
        checkpointer: &mut C,
    ) -> Option<CheckpointCycle> {
        log::debug!("Processing {} records from {}", records.len(), self.shard_id);

        for record in records {
            let outcome = self.process_record_with_retries(record).await;
            self.stats.record(&outcome);
        }

        self.checkpoints.after_batch(checkpointer).await
    }

    /// Run one record through the retry state machine
    pub async fn process_record_with_retries(&self, record: &StreamRecord) -> RecordOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.process_single_record(record).await {
                Ok(disposition) => {
                    return RecordOutcome::Processed {
                        disposition,
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    log::warn!(
                        "⚠️  Failed processing record {} on shard {} (attempt {} of {}): {}",
                        record,
                        self.shard_id,
                        attempt,
                        self.retry.max_attempts,
                        e
                    );
                }
            }

            if self.retry.is_last_attempt(attempt) {
                log::error!(
                    "❌ Couldn't process record {} on shard {}. Skipping the record.",
                    record,
                    self.shard_id
                );
                return RecordOutcome::Abandoned { attempts: attempt };
            }
            self.retry.pause().await;
        }
    }

    /// One attempt at the classify → resolve → score → emit unit
    async fn process_single_record(&self, record: &StreamRecord) -> Result<RecordDisposition, ProcessingError> {
        let classification = match classify(&record.data) {
            Ok(classification) => classification,
            Err(e) => {
                log::error!(
                    "Dropping undecodable record {} on shard {}: {}",
                    record,
                    self.shard_id,
                    e
                );
                return Ok(RecordDisposition::Malformed);
            }
        };

        let event = match classification {
            Classification::Visit(event) => event,
            Classification::Ignored { event_name } => {
                log::info!("Ignoring eventName {}", event_name);
                return Ok(RecordDisposition::Ignored);
            }
            Classification::Unnamed => return Ok(RecordDisposition::Ignored),
        };

        log::debug!("Processing {:?} for {:?}", event.kind, event.identity());

        let session_id = event.session_id.as_deref();
        let outcome = match self.store.record_visit(session_id, event.user_id.as_deref()) {
            Some(outcome) => outcome,
            None => {
                log::warn!(
                    "Visit record {} on shard {} has neither userSessionId nor userId",
                    record,
                    self.shard_id
                );
                return Ok(RecordDisposition::Ignored);
            }
        };

        if !outcome.is_frequent_visitor {
            return Ok(RecordDisposition::Scored);
        }

        log::info!(
            "Spotted frequent visitor: {:?}, {:?} (score {})",
            outcome.user_id,
            session_id,
            outcome.frequency_score
        );
        self.emitter.emit(session_id, outcome.user_id.as_deref()).await?;
        Ok(RecordDisposition::Tagged)
    }

    /// Shut down the processor for this shard
    ///
    /// End of shard forces a final commit so child shards can start from a
    /// committed position; a lost lease commits nothing.
    pub async fn shutdown<C: Checkpointer + ?Sized>(&mut self, checkpointer: &mut C, reason: ShutdownReason) {
        log::info!(
            "Shutting down record processor for shard: {} ({:?})",
            self.shard_id,
            reason
        );
        if reason == ShutdownReason::Terminate {
            self.checkpoints.force(checkpointer).await;
        }

        let stats = &self.stats;
        log::info!(
            "📊 Shard {} totals: {} records | {} tagged | {} scored | {} ignored | {} malformed | {} abandoned | {} retries",
            self.shard_id,
            stats.total(),
            stats.tagged,
            stats.scored,
            stats.ignored,
            stats.malformed,
            stats.abandoned,
            stats.retries
        );
    }
}
