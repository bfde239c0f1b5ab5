//! Shared data models for the vderiv backend.
//!
//! This crate provides Serde-serializable types for:
//! - Source assets and derivative records
//! - Derivative kinds and lifecycle states
//! - Encode profiles (named output configurations)
//! - Status and best-sources views returned to the web layer

pub mod asset;
pub mod derivative;
pub mod encoding;
pub mod job;
pub mod status;

// Re-export common types
pub use asset::{AssetId, SourceAsset};
pub use derivative::{DerivativeKind, DerivativeRecord, DerivativeState};
pub use encoding::{EncodeProfile, H264Settings, Vp9Settings};
pub use job::JobId;
pub use status::{DerivativeStatus, VideoSources};
