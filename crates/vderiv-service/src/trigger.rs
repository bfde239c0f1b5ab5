//! New-asset trigger.
//!
//! The content system emits a [`SourceAssetEvent`] after its own
//! transaction commits, so a worker can never observe a half-written
//! source reference. The trigger reacts only to newly created assets whose
//! filename looks like a video, then performs the standard idempotent
//! ensure-and-enqueue.

use std::path::Path;

use tracing::debug;

use vderiv_models::{JobId, SourceAsset};

use crate::error::ServiceResult;
use crate::service::DerivativeService;

/// Filename extensions treated as source videos.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "webm", "m4v", "avi", "mkv", "wmv", "mpg", "mpeg",
];

/// Whether a filename's extension is in the known video set.
pub fn is_video_filename(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Event the content system emits after committing an asset save.
#[derive(Debug, Clone)]
pub struct SourceAssetEvent {
    /// The saved asset
    pub asset: SourceAsset,
    /// True when the save created the asset (uploads), false for edits
    pub created: bool,
}

impl DerivativeService {
    /// React to a committed asset save.
    ///
    /// Enqueues only on create; edits are ignored until file-change
    /// detection exists. Returns the job id when work was scheduled.
    pub async fn on_source_asset_saved(
        &self,
        event: &SourceAssetEvent,
    ) -> ServiceResult<Option<JobId>> {
        if !event.created {
            return Ok(None);
        }
        if event.asset.file_path.is_empty() || !is_video_filename(&event.asset.file_path) {
            debug!(asset = %event.asset.id, "ignoring non-video asset");
            return Ok(None);
        }

        let profile = self.default_profile().to_string();
        let job_id = self.enqueue_transcode(&event.asset, &profile).await?;
        Ok(Some(job_id))
    }
}
