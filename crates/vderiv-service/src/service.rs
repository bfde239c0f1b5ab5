//! The derivative service.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use vderiv_ledger::Ledger;
use vderiv_models::{
    AssetId, DerivativeKind, DerivativeStatus, EncodeProfile, JobId, SourceAsset, VideoSources,
};
use vderiv_queue::{JobQueue, TranscodeJob};
use vderiv_store::{MediaStore, SourcesCache};

use crate::error::{ServiceError, ServiceResult};

/// Facade over ledger, queue, store and cache for collaborators.
#[derive(Clone)]
pub struct DerivativeService {
    ledger: Ledger,
    queue: Arc<JobQueue>,
    store: MediaStore,
    cache: SourcesCache,
    default_profile: String,
}

impl DerivativeService {
    /// Create a service with the built-in default profile.
    pub fn new(ledger: Ledger, queue: Arc<JobQueue>, store: MediaStore, cache: SourcesCache) -> Self {
        Self {
            ledger,
            queue,
            store,
            cache,
            default_profile: vderiv_models::encoding::DEFAULT_PROFILE.to_string(),
        }
    }

    /// Override the profile the trigger enqueues under.
    pub fn with_default_profile(mut self, profile: impl Into<String>) -> Self {
        self.default_profile = profile.into();
        self
    }

    /// Profile slug used by the new-asset trigger.
    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Ensure Pending ledger rows exist for both renditions and schedule
    /// asynchronous work. Returns immediately with the queue job's id.
    ///
    /// Safe to call repeatedly: rows converge through the schema's
    /// uniqueness constraint, and a duplicate queue delivery is resolved by
    /// the worker's claim, not here.
    pub async fn enqueue_transcode(
        &self,
        asset: &SourceAsset,
        profile: &str,
    ) -> ServiceResult<JobId> {
        if EncodeProfile::by_slug(profile).is_none() {
            return Err(ServiceError::UnknownProfile(profile.to_string()));
        }

        self.ledger.upsert_source_asset(asset).await?;
        self.ledger.ensure(asset.id, profile, DerivativeKind::Mp4).await?;
        self.ledger.ensure(asset.id, profile, DerivativeKind::Webm).await?;

        let job = TranscodeJob::new(asset.id, profile);
        self.queue.enqueue(&job).await?;
        self.ledger.set_owning_job(asset.id, profile, &job.job_id).await?;

        counter!("vderiv_jobs_enqueued_total").increment(1);
        info!(asset = %asset.id, profile, job_id = %job.job_id, "enqueued transcode");
        Ok(job.job_id)
    }

    /// Per-rendition status for an asset, across profiles. Read-only.
    pub async fn get_status(&self, asset: AssetId) -> ServiceResult<Vec<DerivativeStatus>> {
        let records = self.ledger.get_for_asset(asset).await?;
        Ok(records
            .iter()
            .map(|record| {
                DerivativeStatus::from_record(
                    record,
                    self.store.url_for(&record.output_ref),
                    self.store.url_for(&record.poster_ref),
                )
            })
            .collect())
    }

    /// Best available sources for (asset, profile), served read-through
    /// from the cache. Fields are empty strings until the rendition is
    /// Ready; cache trouble degrades to a ledger read, never an error.
    pub async fn get_sources(&self, asset: AssetId, profile: &str) -> ServiceResult<VideoSources> {
        match self.cache.get(asset, profile).await {
            Ok(Some(sources)) => return Ok(sources),
            Ok(None) => {}
            Err(e) => warn!(asset = %asset, profile, error = %e, "sources cache read failed"),
        }

        let ready = self.ledger.ready_records(asset, profile).await?;
        let mp4 = ready.iter().find(|r| r.kind == DerivativeKind::Mp4);
        let webm = ready.iter().find(|r| r.kind == DerivativeKind::Webm);

        // Poster is shared; prefer whichever rendition carries it
        let poster_ref = webm
            .map(|r| r.poster_ref.as_str())
            .filter(|r| !r.is_empty())
            .or_else(|| mp4.map(|r| r.poster_ref.as_str()))
            .unwrap_or("");

        let sources = VideoSources {
            mp4: mp4.map(|r| self.store.url_for(&r.output_ref)).unwrap_or_default(),
            webm: webm.map(|r| self.store.url_for(&r.output_ref)).unwrap_or_default(),
            poster: self.store.url_for(poster_ref),
        };

        if let Err(e) = self.cache.put(asset, profile, &sources).await {
            warn!(asset = %asset, profile, error = %e, "sources cache write failed");
        }

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vderiv_models::encoding::DEFAULT_PROFILE;
    use vderiv_queue::QueueConfig;
    use vderiv_store::StoreConfig;

    // No broker in unit tests: the queue and cache point at a closed port,
    // which only matters for operations that actually connect.
    async fn test_service() -> (DerivativeService, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::connect(&format!(
            "sqlite://{}",
            dir.path().join("ledger.db").display()
        ))
        .await
        .unwrap();
        let queue = Arc::new(
            JobQueue::new(QueueConfig {
                redis_url: "redis://127.0.0.1:1".to_string(),
                ..QueueConfig::default()
            })
            .unwrap(),
        );
        let store = MediaStore::new(&StoreConfig {
            media_root: dir.path().join("media"),
            media_url_base: "/media".to_string(),
        })
        .unwrap();
        let cache = SourcesCache::new("redis://127.0.0.1:1").unwrap();

        (DerivativeService::new(ledger, queue, store, cache), dir)
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected_before_any_side_effect() {
        let (service, _dir) = test_service().await;
        let asset = SourceAsset::new(1, "documents/in.mp4", "In");

        let err = service.enqueue_transcode(&asset, "no_such_profile").await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownProfile(_)));
        assert!(service.ledger().get_for_asset(asset.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_maps_refs_to_urls() {
        let (service, _dir) = test_service().await;
        let asset = AssetId(42);

        service.ledger().ensure(asset, DEFAULT_PROFILE, DerivativeKind::Mp4).await.unwrap();
        service.ledger().ensure(asset, DEFAULT_PROFILE, DerivativeKind::Webm).await.unwrap();
        service
            .ledger()
            .mark_ready(
                asset,
                DEFAULT_PROFILE,
                DerivativeKind::Mp4,
                "derived/videos/42/hero_mobile_v1/video.mp4",
                "",
            )
            .await
            .unwrap();

        let status = service.get_status(asset).await.unwrap();
        assert_eq!(status.len(), 2);

        let mp4 = status.iter().find(|s| s.kind == DerivativeKind::Mp4).unwrap();
        assert_eq!(mp4.output_url, "/media/derived/videos/42/hero_mobile_v1/video.mp4");
        assert_eq!(mp4.progress, 100);

        let webm = status.iter().find(|s| s.kind == DerivativeKind::Webm).unwrap();
        assert!(webm.output_url.is_empty());
    }

    #[tokio::test]
    async fn sources_fall_back_to_the_ledger_without_a_cache() {
        let (service, _dir) = test_service().await;
        let asset = AssetId(7);

        service.ledger().ensure(asset, DEFAULT_PROFILE, DerivativeKind::Mp4).await.unwrap();
        service.ledger().ensure(asset, DEFAULT_PROFILE, DerivativeKind::Webm).await.unwrap();
        service
            .ledger()
            .attach_poster(asset, DEFAULT_PROFILE, "derived/videos/7/hero_mobile_v1/poster.jpg", 5)
            .await
            .unwrap();
        service
            .ledger()
            .mark_ready(
                asset,
                DEFAULT_PROFILE,
                DerivativeKind::Mp4,
                "derived/videos/7/hero_mobile_v1/video.mp4",
                "",
            )
            .await
            .unwrap();

        let sources = service.get_sources(asset, DEFAULT_PROFILE).await.unwrap();
        assert_eq!(sources.mp4, "/media/derived/videos/7/hero_mobile_v1/video.mp4");
        assert_eq!(sources.webm, "");
        assert_eq!(sources.poster, "/media/derived/videos/7/hero_mobile_v1/poster.jpg");
    }

    #[tokio::test]
    async fn sources_are_empty_until_something_is_ready() {
        let (service, _dir) = test_service().await;
        let sources = service.get_sources(AssetId(9), DEFAULT_PROFILE).await.unwrap();
        assert!(sources.is_empty());
    }
}
