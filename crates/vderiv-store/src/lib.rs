//! Media storage for the vderiv pipeline.
//!
//! This crate provides:
//! - Resolution of source paths with a storage-root containment check
//! - The derived output layout and publication of finished renditions
//! - URL mapping for stored references
//! - The Redis-backed best-sources cache with explicit invalidation

pub mod error;
pub mod sources_cache;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use sources_cache::{SourcesCache, SOURCES_TTL_SECS};
pub use store::{MediaStore, StoreConfig};
