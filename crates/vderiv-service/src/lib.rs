//! Public operations of the derivative pipeline.
//!
//! This crate is the boundary the content system and web layer call into:
//! - `enqueue_transcode`: ensure ledger rows and schedule asynchronous work
//! - `get_status`: per-rendition state for the editor/admin UI
//! - `get_sources`: cached best-available sources for rendering
//! - the new-asset trigger and the backfill entry point
//!
//! Callers never talk to the queue or the encoder directly.

pub mod backfill;
pub mod error;
pub mod service;
pub mod trigger;

pub use backfill::{BackfillReport, BackfillRequest};
pub use error::{ServiceError, ServiceResult};
pub use service::DerivativeService;
pub use trigger::{is_video_filename, SourceAssetEvent, VIDEO_EXTENSIONS};
