//! Derivative records and their lifecycle states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::AssetId;

/// What type of output a derivative row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeKind {
    /// H.264 MP4, the required broadly-compatible rendition
    Mp4,
    /// VP9 WebM, the optional best-effort rendition
    Webm,
    /// Anything else (reserved)
    Other,
}

impl DerivativeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeKind::Mp4 => "mp4",
            DerivativeKind::Webm => "webm",
            DerivativeKind::Other => "other",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "mp4" => Some(DerivativeKind::Mp4),
            "webm" => Some(DerivativeKind::Webm),
            "other" => Some(DerivativeKind::Other),
            _ => None,
        }
    }

    /// Whether a failed stage of this kind fails the whole job.
    pub fn is_required(&self) -> bool {
        matches!(self, DerivativeKind::Mp4)
    }
}

impl fmt::Display for DerivativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of one derivative record.
///
/// `Pending -> Processing -> {Ready | Failed}`; `Failed -> Processing` on
/// re-claim is the only outbound edge from a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeState {
    /// Row exists, no worker has claimed it yet
    #[default]
    Pending,
    /// A worker owns this row for the current attempt
    Processing,
    /// Output produced and published
    Ready,
    /// Last attempt failed; re-claimable
    Failed,
}

impl DerivativeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeState::Pending => "pending",
            DerivativeState::Processing => "processing",
            DerivativeState::Ready => "ready",
            DerivativeState::Failed => "failed",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DerivativeState::Pending),
            "processing" => Some(DerivativeState::Processing),
            "ready" => Some(DerivativeState::Ready),
            "failed" => Some(DerivativeState::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no more updates expected
    /// without a new claim cycle).
    pub fn is_terminal(&self) -> bool {
        matches!(self, DerivativeState::Ready | DerivativeState::Failed)
    }
}

impl fmt::Display for DerivativeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One derivative row: (source asset, profile, kind) plus lifecycle state.
///
/// At most one record exists per (source_asset_id, profile, kind); the
/// ledger schema enforces this, not application-level locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativeRecord {
    /// Row id assigned by the ledger
    pub id: i64,
    /// The original upload this derivative was produced from
    pub source_asset_id: AssetId,
    /// Named output configuration (e.g. `hero_mobile_v1`)
    pub profile: String,
    /// Output type
    pub kind: DerivativeKind,
    /// Lifecycle state
    pub state: DerivativeState,
    /// 0-100, monotonically non-decreasing within a processing attempt
    pub progress: u8,
    /// Storage reference of the produced file; empty until Ready
    pub output_ref: String,
    /// Shared reference to the generated poster still; attached as soon
    /// as available, independent of video completion
    pub poster_ref: String,
    /// Queue job currently/last responsible for this row (traceability only)
    pub owning_job_id: String,
    /// Content fingerprint of the source at processing time
    pub source_etag: String,
    /// Human-readable error; present only when state is Failed
    pub error: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DerivativeRecord {
    /// Whether this record has a published output.
    pub fn is_ready(&self) -> bool {
        self.state == DerivativeState::Ready
    }
}

impl fmt::Display for DerivativeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.source_asset_id, self.profile, self.kind, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [DerivativeKind::Mp4, DerivativeKind::Webm, DerivativeKind::Other] {
            assert_eq!(DerivativeKind::from_str_opt(kind.as_str()), Some(kind));
        }
        assert_eq!(DerivativeKind::from_str_opt("avi"), None);
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            DerivativeState::Pending,
            DerivativeState::Processing,
            DerivativeState::Ready,
            DerivativeState::Failed,
        ] {
            assert_eq!(DerivativeState::from_str_opt(state.as_str()), Some(state));
        }
        assert_eq!(DerivativeState::from_str_opt("done"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!DerivativeState::Pending.is_terminal());
        assert!(!DerivativeState::Processing.is_terminal());
        assert!(DerivativeState::Ready.is_terminal());
        assert!(DerivativeState::Failed.is_terminal());
    }

    #[test]
    fn only_mp4_is_required() {
        assert!(DerivativeKind::Mp4.is_required());
        assert!(!DerivativeKind::Webm.is_required());
        assert!(!DerivativeKind::Other.is_required());
    }
}
