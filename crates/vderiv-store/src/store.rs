//! Filesystem layout for originals and derived outputs.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use vderiv_models::{AssetId, DerivativeKind};

use crate::error::{StoreError, StoreResult};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding originals and derived outputs
    pub media_root: PathBuf,
    /// URL prefix the web server maps onto `media_root`
    pub media_url_base: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("./media"),
            media_url_base: "/media".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            media_root: std::env::var("VDERIV_MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            media_url_base: std::env::var("VDERIV_MEDIA_URL")
                .unwrap_or_else(|_| "/media".to_string()),
        }
    }
}

/// Access to the media tree. Originals are never mutated; derivatives live
/// under a stable `derived/` namespace so long-lived cache headers can be
/// set for them independently of the originals.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    url_base: String,
}

impl MediaStore {
    /// Create a store rooted at `config.media_root`, creating the root if
    /// missing. The root is canonicalized once so containment checks
    /// compare resolved paths.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.media_root)?;
        let root = config.media_root.canonicalize()?;
        Ok(Self {
            root,
            url_base: config.media_url_base.trim_end_matches('/').to_string(),
        })
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a source path relative to the storage root.
    ///
    /// The joined path is canonicalized (following symlinks) and rejected
    /// unless it resolves inside the root. This runs before any subprocess
    /// sees the path.
    pub fn resolve_source(&self, relative: &str) -> StoreResult<PathBuf> {
        let joined = self.root.join(relative);
        let resolved = joined
            .canonicalize()
            .map_err(|_| StoreError::SourceMissing(joined.clone()))?;

        if !resolved.starts_with(&self.root) {
            return Err(StoreError::PathOutsideRoot(resolved));
        }
        if !resolved.is_file() {
            return Err(StoreError::SourceMissing(resolved));
        }
        Ok(resolved)
    }

    /// Storage reference for a rendition output.
    ///
    /// Filenames are kept predictable: `derived/videos/{asset}/{profile}/video.{ext}`.
    pub fn derived_ref(&self, asset: AssetId, profile: &str, kind: DerivativeKind) -> String {
        let name = match kind {
            DerivativeKind::Mp4 => "video.mp4",
            DerivativeKind::Webm => "video.webm",
            DerivativeKind::Other => "file.bin",
        };
        format!("derived/videos/{asset}/{profile}/{name}")
    }

    /// Storage reference for the poster still.
    pub fn poster_ref(&self, asset: AssetId, profile: &str) -> String {
        format!("derived/videos/{asset}/{profile}/poster.jpg")
    }

    /// Absolute path of a storage reference.
    pub fn absolute(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }

    /// Public URL of a storage reference; empty in, empty out.
    pub fn url_for(&self, reference: &str) -> String {
        if reference.is_empty() {
            return String::new();
        }
        format!("{}/{}", self.url_base, reference.trim_start_matches('/'))
    }

    /// Publish a finished file from the scratch directory into the derived
    /// tree. Tries a fast rename first; scratch and media root may be on
    /// different filesystems, so EXDEV falls back to copy-and-delete.
    pub async fn publish(&self, src: &Path, reference: &str) -> StoreResult<()> {
        let dst = self.absolute(reference);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(src, &dst).await {
            Ok(()) => {}
            Err(e) if is_cross_device_error(&e) => {
                debug!(src = %src.display(), dst = %dst.display(), "cross-device publish, copying");
                fs::copy(src, &dst).await?;
                fs::remove_file(src).await?;
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        debug!(reference, "published derivative");
        Ok(())
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}
