//! Transcode job payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vderiv_models::{AssetId, JobId};

/// Job to derive all renditions of one (source asset, profile).
///
/// The payload deliberately carries only identifiers: the worker resolves
/// the source path through the ledger so a stale payload can never point
/// at a moved file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Source asset to derive from
    pub source_asset_id: AssetId,
    /// Encode profile slug
    pub profile: String,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl TranscodeJob {
    /// Create a new transcode job.
    pub fn new(source_asset_id: impl Into<AssetId>, profile: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            source_asset_id: source_asset_id.into(),
            profile: profile.into(),
            enqueued_at: Utc::now(),
        }
    }

    /// Stable key identifying the work unit (not the delivery attempt).
    ///
    /// Used for logging and tracing; two deliveries of the same work unit
    /// share this key even when their `job_id`s differ.
    pub fn work_key(&self) -> String {
        format!("transcode:{}:{}", self.source_asset_id, self.profile)
    }
}
