//! # Local Stream Substrate
//!
//! File and SQLite backed stand-ins for a managed stream:
//!
//! - `shard_reader` - JSONL file per shard, line number as sequence number
//! - `sqlite_checkpoint` - shard checkpoints and leases
//! - `jsonl_publisher` - tag events appended to a JSONL output stream
//! - `worker` - one task per shard driving a `RecordDispatcher`

pub mod jsonl_publisher;
pub mod shard_reader;
pub mod sqlite_checkpoint;
pub mod worker;

pub use jsonl_publisher::JsonlEventPublisher;
pub use shard_reader::ShardReader;
pub use sqlite_checkpoint::{CheckpointStoreError, ShardCheckpointer, SqliteCheckpointStore};
pub use worker::{ShardReport, Worker, WorkerError};
