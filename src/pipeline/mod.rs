//! # Frequent-Visitor Pipeline
//!
//! Online aggregation of user-activity events into frequent-visitor tags.
//!
//! ## Architecture
//!
//! ```text
//! StreamRecord batch (per shard)
//!     ↓
//! RecordDispatcher (retry + poison-record skip)
//!     ↓
//! classify()        → VisitEvent | ignored | malformed
//!     ↓
//! ProfileStore      → identity resolution (session ↔ user merge)
//!     ↓
//! VisitWindow       → sliding interval flags, frequency score
//!     ↓ (score ≥ threshold)
//! TagEmitter        → userTag event, partitioned by session id
//!
//! CheckpointManager runs after each batch, at most once per interval.
//! ```
//!
//! ## Module Organization
//!
//! - `types` - Records, visit events, identities, tag events, clock
//! - `classifier` - Payload decoding and event classification
//! - `window` - Interval keys and sliding-window scoring
//! - `profiles` - Two-tier locked profile store
//! - `emitter` - Publisher trait and tag emission
//! - `retry` - Bounded fixed-backoff retry policy
//! - `checkpoint` - Checkpoint trait, outcomes and commit cadence
//! - `dispatcher` - Per-shard record processing
//! - `errors` - Parse / processing / publish errors

pub mod checkpoint;
pub mod classifier;
pub mod dispatcher;
pub mod emitter;
pub mod errors;
pub mod profiles;
pub mod retry;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use checkpoint::{CheckpointCycle, CheckpointManager, CheckpointOutcome, Checkpointer};
pub use classifier::{classify, Classification};
pub use dispatcher::{DispatchStats, RecordDisposition, RecordDispatcher, RecordOutcome, ShutdownReason};
pub use emitter::{EventPublisher, TagEmitter};
pub use errors::{ParseError, ProcessingError, PublishError};
pub use profiles::{ProfileStore, UserProfile, VisitOutcome};
pub use retry::RetryPolicy;
pub use types::{system_clock, Clock, Identity, StreamRecord, TagEvent, VisitEvent, VisitKind};
pub use window::{IntervalUnit, VisitWindow, WindowPolicy};
