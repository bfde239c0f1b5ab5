//! Redis Streams transcode job queue.
//!
//! This crate provides:
//! - Fire-and-forget job enqueueing via Redis Streams
//! - At-least-once consumption through a consumer group
//! - Redelivery of entries idle past the visibility timeout
//! - Retry counting and a dead-letter stream
//!
//! Duplicate delivery is expected and tolerated; the ledger's claim
//! protocol resolves it, so the queue performs no deduplication.

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::TranscodeJob;
pub use queue::{JobQueue, QueueConfig};
