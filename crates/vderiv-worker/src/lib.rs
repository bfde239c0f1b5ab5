//! Transcode worker.
//!
//! This crate provides:
//! - The queue consumption loop (one job at a time, with redelivery of
//!   stale entries and DLQ after max retries)
//! - The pipeline orchestrator: claim, probe, poster, required MP4,
//!   optional WebM, with ledger updates and cache invalidation after
//!   every transition
//! - Worker configuration and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod pipeline;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use pipeline::TranscodePipeline;
