//! JSONL shard reader with resume and tail support
//!
//! One file is one shard; the 1-based line number is the record's sequence
//! number. Lines at or before the last checkpointed sequence are skipped.
//! Lines are passed on as raw bytes; decoding is left to the classifier.

use crate::pipeline::types::StreamRecord;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

pub struct ShardReader {
    shard_id: String,
    path: PathBuf,
    reader: BufReader<File>,
    /// Sequence number of the last line read
    position: u64,
    follow: bool,
    poll_interval: Duration,
}

impl ShardReader {
    /// Open `path` and skip everything up to `resume_after`
    pub async fn open(
        shard_id: impl Into<String>,
        path: impl AsRef<Path>,
        resume_after: u64,
        follow: bool,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let mut reader = Self {
            shard_id: shard_id.into(),
            path,
            reader: BufReader::new(file),
            position: 0,
            follow,
            poll_interval: Duration::from_millis(100),
        };

        let mut line = Vec::new();
        while reader.position < resume_after {
            line.clear();
            if reader.reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            reader.position += 1;
        }

        log::info!(
            "📖 Opened shard {} at {} (resuming after sequence {})",
            reader.shard_id,
            reader.path.display(),
            reader.position
        );
        Ok(reader)
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next batch of up to `max_records` records
    ///
    /// Returns `None` at end of shard. In follow mode the end is never
    /// reached; the reader waits for appended lines instead.
    pub async fn next_batch(&mut self, max_records: usize) -> std::io::Result<Option<Vec<StreamRecord>>> {
        let mut batch = Vec::with_capacity(max_records);
        let mut line = Vec::new();

        while batch.len() < max_records {
            line.clear();
            if self.reader.read_until(b'\n', &mut line).await? == 0 {
                if !batch.is_empty() {
                    break;
                }
                if !self.follow {
                    return Ok(None);
                }
                sleep(self.poll_interval).await;
                continue;
            }

            self.position += 1;
            let trimmed = trim_ascii_whitespace(&line);
            if trimmed.is_empty() {
                continue;
            }
            batch.push(StreamRecord::new(self.position, self.shard_id.clone(), trimmed.to_vec()));
        }

        Ok(Some(batch))
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
