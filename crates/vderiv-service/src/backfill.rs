//! Backfill entry point for existing assets.

use tracing::info;

use vderiv_models::{DerivativeKind, SourceAsset};
use vderiv_queue::TranscodeJob;

use crate::error::ServiceResult;
use crate::service::DerivativeService;
use crate::trigger::is_video_filename;

/// What to backfill.
#[derive(Debug, Clone)]
pub struct BackfillRequest {
    /// Profile slug to backfill under
    pub profile: String,
    /// Restrict to these asset ids; `None` scans everything supplied
    pub asset_ids: Option<Vec<i64>>,
    /// Report without enqueueing
    pub dry_run: bool,
}

/// Outcome counts of a backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub scanned: u64,
    pub queued: u64,
    pub skipped: u64,
    pub dry_run: bool,
}

impl DerivativeService {
    /// Ensure-and-enqueue over an existing asset set.
    ///
    /// The caller (the content system) supplies the candidate assets; this
    /// walks them, creates missing Pending rows, and enqueues a job for
    /// every asset that still has claimable work. Assets whose rows are all
    /// Ready are skipped, so re-running a backfill is cheap and safe.
    pub async fn backfill(
        &self,
        request: &BackfillRequest,
        assets: &[SourceAsset],
    ) -> ServiceResult<BackfillReport> {
        let mut report = BackfillReport {
            dry_run: request.dry_run,
            ..BackfillReport::default()
        };

        for asset in assets {
            if let Some(ids) = &request.asset_ids {
                if !ids.contains(&asset.id.as_i64()) {
                    continue;
                }
            }

            report.scanned += 1;

            if asset.file_path.is_empty() || !is_video_filename(&asset.file_path) {
                continue;
            }

            self.ledger().upsert_source_asset(asset).await?;

            let mut created_any = false;
            for kind in [DerivativeKind::Mp4, DerivativeKind::Webm] {
                if self.ledger().ensure(asset.id, &request.profile, kind).await? {
                    created_any = true;
                }
            }

            let needs_work = self.ledger().needs_work(asset.id, &request.profile).await?;
            if !created_any && !needs_work {
                report.skipped += 1;
                continue;
            }

            if request.dry_run {
                report.queued += 1;
                info!(asset = %asset.id, profile = %request.profile, "[dry-run] would enqueue");
                continue;
            }

            let job = TranscodeJob::new(asset.id, request.profile.clone());
            self.queue().enqueue(&job).await?;
            self.ledger()
                .set_owning_job(asset.id, &request.profile, &job.job_id)
                .await?;
            report.queued += 1;
            info!(asset = %asset.id, job_id = %job.job_id, profile = %request.profile, "queued backfill job");
        }

        info!(
            scanned = report.scanned,
            queued = report.queued,
            skipped = report.skipped,
            dry_run = report.dry_run,
            "backfill done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use vderiv_ledger::Ledger;
    use vderiv_models::encoding::DEFAULT_PROFILE;
    use vderiv_models::AssetId;
    use vderiv_queue::{JobQueue, QueueConfig};
    use vderiv_store::{MediaStore, SourcesCache, StoreConfig};

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

    fn request(dry_run: bool) -> BackfillRequest {
        BackfillRequest {
            profile: DEFAULT_PROFILE.to_string(),
            asset_ids: None,
            dry_run,
        }
    }

    #[tokio::test]
    async fn dry_run_counts_without_enqueueing() {
        let (service, _dir) = test_service().await;

        // One finished asset: rows exist and are Ready
        let done = SourceAsset::new(1, "documents/done.mp4", "Done");
        for kind in [DerivativeKind::Mp4, DerivativeKind::Webm] {
            service.ledger().ensure(done.id, DEFAULT_PROFILE, kind).await.unwrap();
            service
                .ledger()
                .mark_ready(done.id, DEFAULT_PROFILE, kind, "derived/x", "")
                .await
                .unwrap();
        }

        let assets = vec![
            done,
            SourceAsset::new(2, "documents/fresh.mov", "Fresh"),
            SourceAsset::new(3, "documents/notes.pdf", "Notes"),
        ];

        let report = service.backfill(&request(true), &assets).await.unwrap();
        assert_eq!(
            report,
            BackfillReport {
                scanned: 3,
                queued: 1,
                skipped: 1,
                dry_run: true
            }
        );

        // Dry run still materializes Pending rows, like a real scan would
        let fresh = service.ledger().records_for(AssetId(2), DEFAULT_PROFILE).await.unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[tokio::test]
    async fn id_filter_restricts_the_scan() {
        let (service, _dir) = test_service().await;
        let assets = vec![
            SourceAsset::new(1, "a.mp4", "A"),
            SourceAsset::new(2, "b.mp4", "B"),
        ];

        let req = BackfillRequest {
            asset_ids: Some(vec![2]),
            ..request(true)
        };
        let report = service.backfill(&req, &assets).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.queued, 1);
        assert!(service.ledger().records_for(AssetId(1), DEFAULT_PROFILE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_rows_count_as_claimable_work() {
        let (service, _dir) = test_service().await;
        let asset = SourceAsset::new(5, "documents/retry.mp4", "Retry");
        for kind in [DerivativeKind::Mp4, DerivativeKind::Webm] {
            service.ledger().ensure(asset.id, DEFAULT_PROFILE, kind).await.unwrap();
        }
        service.ledger().fail_all(asset.id, DEFAULT_PROFILE, "boom").await.unwrap();

        let report = service.backfill(&request(true), &[asset]).await.unwrap();
        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped, 0);
    }
}
