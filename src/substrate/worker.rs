//! Worker: one task per shard sharing a single profile store

use super::shard_reader::ShardReader;
use super::sqlite_checkpoint::{CheckpointStoreError, ShardCheckpointer, SqliteCheckpointStore};
use crate::config::AgentConfig;
use crate::pipeline::checkpoint::CheckpointCycle;
use crate::pipeline::dispatcher::{DispatchStats, RecordDispatcher, ShutdownReason};
use crate::pipeline::emitter::{EventPublisher, TagEmitter};
use crate::pipeline::profiles::ProfileStore;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::types::Clock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("shard {shard_id} I/O error: {source}")]
    Io {
        shard_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint store error: {0}")]
    CheckpointStore(#[from] CheckpointStoreError),

    #[error("shard task panicked: {0}")]
    ShardPanicked(#[from] tokio::task::JoinError),
}

/// How a shard task finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub shard_id: String,
    pub reason: ShutdownReason,
    /// Last sequence number handed to the dispatcher
    pub position: u64,
    pub stats: DispatchStats,
}

pub struct Worker {
    config: AgentConfig,
    profiles: Arc<ProfileStore>,
    checkpoints: Arc<SqliteCheckpointStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Clock,
    follow: bool,
}

impl Worker {
    pub fn new(
        config: AgentConfig,
        checkpoints: Arc<SqliteCheckpointStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Clock,
    ) -> Self {
        let profiles = Arc::new(ProfileStore::new(config.window, clock.clone()));
        Self {
            config,
            profiles,
            checkpoints,
            publisher,
            clock,
            follow: false,
        }
    }

    /// Tail shards instead of ending them at EOF
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    /// Process every configured shard until each one ends
    ///
    /// The first shard to fail with an error or a panic fails the whole
    /// worker, even while other shards are still running. Remaining shard
    /// tasks are aborted. Reports come back in completion order.
    pub async fn run(&self) -> Result<Vec<ShardReport>, WorkerError> {
        log::info!(
            "🚀 Worker {} starting {} shard(s) of {}",
            self.config.worker_id,
            self.config.shard_paths.len(),
            self.config.stream_name
        );

        let mut shards = JoinSet::new();
        for path in &self.config.shard_paths {
            let task = ShardTask {
                shard_id: shard_id_for(path),
                path: path.clone(),
                owner: self.config.worker_id.clone(),
                batch_size: self.config.batch_size,
                follow: self.follow,
                retry: self.config.retry,
                checkpoint_interval: chrono::Duration::seconds(self.config.checkpoint_interval_secs),
                profiles: self.profiles.clone(),
                checkpoints: self.checkpoints.clone(),
                emitter: TagEmitter::new(self.publisher.clone(), self.config.agent_name.clone()),
                clock: self.clock.clone(),
            };
            shards.spawn(task.run());
        }

        let mut reports = Vec::with_capacity(shards.len());
        while let Some(joined) = shards.join_next().await {
            match joined? {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::error!("❌ Shard failed, stopping worker {}: {}", self.config.worker_id, e);
                    shards.abort_all();
                    return Err(e);
                }
            }
        }

        let (anonymous, authenticated) = self.profiles.profile_counts();
        log::info!(
            "✅ Worker {} finished: {} anonymous profile(s), {} authenticated profile(s)",
            self.config.worker_id,
            anonymous,
            authenticated
        );
        Ok(reports)
    }
}

/// Shard id is the file stem, e.g. `streams/shard-0.jsonl` -> `shard-0`
pub fn shard_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct ShardTask {
    shard_id: String,
    path: PathBuf,
    owner: String,
    batch_size: usize,
    follow: bool,
    retry: RetryPolicy,
    checkpoint_interval: chrono::Duration,
    profiles: Arc<ProfileStore>,
    checkpoints: Arc<SqliteCheckpointStore>,
    emitter: TagEmitter,
    clock: Clock,
}

impl ShardTask {
    async fn run(self) -> Result<ShardReport, WorkerError> {
        self.checkpoints.claim_lease(&self.shard_id, &self.owner)?;
        let resume_after = self.checkpoints.last_sequence(&self.shard_id)?;

        let io_err = |source| WorkerError::Io {
            shard_id: self.shard_id.clone(),
            source,
        };
        let mut reader = ShardReader::open(self.shard_id.clone(), &self.path, resume_after, self.follow)
            .await
            .map_err(io_err)?;

        let mut checkpointer = ShardCheckpointer::new(self.checkpoints.clone(), self.shard_id.clone(), self.owner.clone());
        checkpointer.set_position(reader.position());

        let mut dispatcher = RecordDispatcher::new(
            self.shard_id.clone(),
            self.profiles.clone(),
            self.emitter.clone(),
            self.retry,
            self.checkpoint_interval,
            self.clock.clone(),
        );

        let reason = loop {
            let batch = match reader.next_batch(self.batch_size).await.map_err(io_err)? {
                Some(batch) => batch,
                None => break ShutdownReason::Terminate,
            };

            checkpointer.set_position(reader.position());
            let cycle = dispatcher.process_records(&batch, &mut checkpointer).await;
            if let Some(CheckpointCycle::Superseded { .. }) = cycle {
                break ShutdownReason::Zombie;
            }
        };

        // Trailing blank lines still count as consumed
        checkpointer.set_position(reader.position());
        dispatcher.shutdown(&mut checkpointer, reason).await;

        Ok(ShardReport {
            shard_id: self.shard_id.clone(),
            reason,
            position: reader.position(),
            stats: dispatcher.stats().clone(),
        })
    }
}
