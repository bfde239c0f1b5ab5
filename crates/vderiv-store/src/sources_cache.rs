//! Redis-backed cache of the best-sources view.
//!
//! Entries carry a short TTL, but the worker invalidates explicitly after
//! every state transition that affects rendered output, so editors see a
//! Ready rendition almost immediately instead of waiting out the TTL.

use redis::AsyncCommands;
use tracing::debug;

use vderiv_models::{AssetId, VideoSources};

use crate::error::StoreResult;

/// TTL for cached source sets; invalidation makes freshness instant anyway.
pub const SOURCES_TTL_SECS: u64 = 600;

/// Cache of [`VideoSources`] per (asset, profile).
#[derive(Debug, Clone)]
pub struct SourcesCache {
    client: redis::Client,
    ttl_secs: u64,
}

impl SourcesCache {
    /// Create a cache client. Does not connect until first use.
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            ttl_secs: SOURCES_TTL_SECS,
        })
    }

    fn key(asset: AssetId, profile: &str) -> String {
        format!("vderiv:sources:v1:asset:{asset}:profile:{profile}")
    }

    /// Fetch a cached entry, `None` on miss.
    pub async fn get(&self, asset: AssetId, profile: &str) -> StoreResult<Option<VideoSources>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(asset, profile)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store an entry with the cache TTL.
    pub async fn put(&self, asset: AssetId, profile: &str, sources: &VideoSources) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(sources)?;
        conn.set_ex::<_, _, ()>(Self::key(asset, profile), payload, self.ttl_secs)
            .await?;
        Ok(())
    }

    /// Drop the entry for (asset, profile).
    pub async fn invalidate(&self, asset: AssetId, profile: &str) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(asset, profile)).await?;
        debug!(asset = %asset, profile, "invalidated sources cache");
        Ok(())
    }
}
