//! Source asset models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an immutable original upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub i64);

impl AssetId {
    /// Get the inner integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AssetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An original uploaded file, registered by the content system.
///
/// The pipeline never mutates the original; it only reads `file_path`
/// (relative to the storage root) to produce derivatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAsset {
    /// Identifier assigned by the content system
    pub id: AssetId,
    /// File path relative to the storage root
    pub file_path: String,
    /// Human-readable title
    pub title: String,
}

impl SourceAsset {
    /// Create a new source asset reference.
    pub fn new(id: impl Into<AssetId>, file_path: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_path: file_path.into(),
            title: title.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_id_display_and_from() {
        let id = AssetId::from(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_i64(), 42);
    }

    #[test]
    fn source_asset_serde_is_transparent_for_id() {
        let asset = SourceAsset::new(7, "documents/intro.mp4", "Intro");
        let json = serde_json::to_string(&asset).unwrap();
        assert!(json.contains("\"id\":7"));
    }
}
