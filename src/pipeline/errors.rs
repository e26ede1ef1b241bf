//! Error taxonomy for record processing
//!
//! Parse failures are deterministic and never retried. Everything that can
//! go wrong after a payload parsed is a [`ProcessingError`] and goes through
//! the dispatcher's retry loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed UTF-8 payload: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("stream {stream} rejected record: {message}")]
    Rejected { stream: String, message: String },

    #[error("I/O error while publishing: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("failed to publish tag event: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to serialize tag event: {0}")]
    Serialization(#[from] serde_json::Error),
}
