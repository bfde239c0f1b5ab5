//! Read-only views returned to the web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::derivative::{DerivativeKind, DerivativeRecord, DerivativeState};

/// Per-rendition status, one entry per ledger row, for the editor/admin UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativeStatus {
    pub kind: DerivativeKind,
    pub state: DerivativeState,
    pub progress: u8,
    pub error: String,
    pub owning_job_id: String,
    /// URL of the produced file; empty until Ready
    pub output_url: String,
    /// URL of the poster still; empty until generated
    pub poster_url: String,
    pub updated_at: DateTime<Utc>,
}

impl DerivativeStatus {
    /// Build from a ledger record plus resolved URLs.
    pub fn from_record(record: &DerivativeRecord, output_url: String, poster_url: String) -> Self {
        Self {
            kind: record.kind,
            state: record.state,
            progress: record.progress,
            error: record.error.clone(),
            owning_job_id: record.owning_job_id.clone(),
            output_url,
            poster_url,
            updated_at: record.updated_at,
        }
    }
}

/// Best available sources for one (asset, profile), as rendered by the
/// web layer. Fields are empty strings until the rendition is Ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSources {
    pub mp4: String,
    pub webm: String,
    pub poster: String,
}

impl VideoSources {
    /// True when no rendition is available yet.
    pub fn is_empty(&self) -> bool {
        self.mp4.is_empty() && self.webm.is_empty() && self.poster.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources() {
        assert!(VideoSources::default().is_empty());
        let sources = VideoSources {
            mp4: "/media/derived/videos/1/hero_mobile_v1/video.mp4".to_string(),
            ..Default::default()
        };
        assert!(!sources.is_empty());
    }
}
