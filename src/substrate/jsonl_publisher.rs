use crate::pipeline::emitter::EventPublisher;
use crate::pipeline::errors::PublishError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One published stream record as written to the output file
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedRecord<'a> {
    stream_name: &'a str,
    partition_key: &'a str,
    data: Value,
}

/// Appends published records to a JSONL file, one record per line
pub struct JsonlEventPublisher {
    stream_name: String,
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl JsonlEventPublisher {
    pub fn new(path: impl AsRef<Path>, stream_name: impl Into<String>) -> Result<Self, PublishError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            stream_name: stream_name.into(),
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for JsonlEventPublisher {
    async fn publish(&self, partition_key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let data = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        let record = PublishedRecord {
            stream_name: &self.stream_name,
            partition_key,
            data,
        };
        let line = serde_json::to_string(&record).map_err(|e| PublishError::Rejected {
            stream: self.stream_name.clone(),
            message: e.to_string(),
        })?;

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn publisher_type(&self) -> &'static str {
        "JSONL"
    }
}
