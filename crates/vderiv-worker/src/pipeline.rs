//! The pipeline orchestrator.
//!
//! One job derives everything for a (source asset, profile): claim the
//! ledger rows, probe the source, produce the poster, then the required
//! MP4 and the optional WebM, persisting every transition and dropping the
//! cached sources view after each one. The failure boundary is asymmetric
//! on purpose: poster and MP4 failures fail the whole job, a WebM failure
//! fails only its own record.

use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use vderiv_ledger::Ledger;
use vderiv_media::{
    ensure_nonempty, mp4_invocation, poster_invocation, probe_duration, run_encoder,
    webm_invocation, ProgressSink,
};
use vderiv_models::{AssetId, DerivativeKind, EncodeProfile};
use vderiv_queue::TranscodeJob;
use vderiv_store::{MediaStore, SourcesCache};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Orchestrates all encoder stages of one transcode job.
pub struct TranscodePipeline {
    ledger: Ledger,
    store: MediaStore,
    cache: SourcesCache,
    config: WorkerConfig,
}

impl TranscodePipeline {
    /// Create a pipeline.
    pub fn new(ledger: Ledger, store: MediaStore, cache: SourcesCache, config: WorkerConfig) -> Self {
        Self {
            ledger,
            store,
            cache,
            config,
        }
    }

    /// Run one job to completion.
    ///
    /// Claims first; a zero-row claim means another worker owns the job or
    /// the work is already Ready, and returns without side effects. Any
    /// error after a successful claim forces every claimed record to
    /// Failed before propagating, so nothing is ever left stuck in
    /// Processing and the queue layer can apply its retry policy.
    pub async fn run(&self, job: &TranscodeJob) -> WorkerResult<()> {
        let asset = job.source_asset_id;

        let claimed = self.ledger.claim(asset, &job.profile, &job.job_id).await?;
        if claimed == 0 {
            if self
                .ledger
                .ready_exists(asset, &job.profile, DerivativeKind::Mp4)
                .await?
            {
                info!(asset = %asset, profile = %job.profile, "already ready, skipping");
            } else {
                info!(asset = %asset, profile = %job.profile, "owned by another worker, skipping");
            }
            return Ok(());
        }

        info!(asset = %asset, profile = %job.profile, job_id = %job.job_id, claimed, "claimed job");
        counter!("vderiv_jobs_claimed_total").increment(1);

        match self.execute(job).await {
            Ok(()) => {
                counter!("vderiv_jobs_completed_total").increment(1);
                Ok(())
            }
            Err(e) => {
                error!(asset = %asset, profile = %job.profile, error = %e, "job failed");
                if let Err(le) = self
                    .ledger
                    .fail_all(asset, &job.profile, &format!("transcode failed: {e}"))
                    .await
                {
                    error!(error = %le, "failed to record job failure in ledger");
                }
                self.invalidate(asset, &job.profile).await;
                counter!("vderiv_jobs_failed_total").increment(1);
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &TranscodeJob) -> WorkerResult<()> {
        let asset_id = job.source_asset_id;
        let profile = EncodeProfile::by_slug(&job.profile)
            .ok_or_else(|| WorkerError::UnknownProfile(job.profile.clone()))?;

        let asset = self
            .ledger
            .source_asset(asset_id)
            .await?
            .ok_or_else(|| {
                WorkerError::job_failed(format!("no source asset registered for id {asset_id}"))
            })?;

        // Path safety: verified before any subprocess sees the path
        let input = self.store.resolve_source(&asset.file_path)?;
        let source_etag = source_fingerprint(&input).await.unwrap_or_default();

        // Probe failure degrades progress fidelity only, never the job
        let duration_ms = match probe_duration(&self.config.ffprobe_program, &input).await {
            Ok(secs) if secs > 0.0 => (secs * 1000.0) as i64,
            Ok(_) => 0,
            Err(e) => {
                warn!(asset = %asset_id, error = %e, "probe failed, progress will be coarse");
                0
            }
        };

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("vderiv-job-")
            .tempdir_in(&self.config.work_dir)?;
        let poster_out = scratch.path().join("poster.jpg");
        let mp4_out = scratch.path().join("out.mp4");
        let webm_out = scratch.path().join("out.webm");

        // Immediate life sign so the status UI moves off 0 right away
        self.ledger.bump_progress_all(asset_id, &job.profile, 1).await?;

        // Poster first: a failure here is fatal to the whole job, because
        // downstream consumers expect a poster immediately. On success it
        // is attached to both records before any video stage completes.
        let inv = poster_invocation(&self.config.ffmpeg_program, &profile, &input, &poster_out);
        run_encoder(&inv, None).await?;
        ensure_nonempty(&poster_out).await?;

        let poster_ref = self.store.poster_ref(asset_id, &job.profile);
        self.store.publish(&poster_out, &poster_ref).await?;
        self.ledger
            .attach_poster(asset_id, &job.profile, &poster_ref, profile.progress_floor)
            .await?;
        self.invalidate(asset_id, &job.profile).await;

        // Required rendition; failure fails the job
        self.encode_rendition(
            job,
            &profile,
            DerivativeKind::Mp4,
            &input,
            &mp4_out,
            duration_ms,
            &source_etag,
        )
        .await?;

        // Optional rendition, independent of the MP4: if it fails, the
        // MP4 stays Ready and only this record moves to Failed.
        if let Err(e) = self
            .encode_rendition(
                job,
                &profile,
                DerivativeKind::Webm,
                &input,
                &webm_out,
                duration_ms,
                &source_etag,
            )
            .await
        {
            warn!(asset = %asset_id, error = %e, "webm stage failed");
            self.ledger
                .mark_failed(asset_id, &job.profile, DerivativeKind::Webm, &format!("webm failed: {e}"))
                .await?;
            counter!("vderiv_stages_failed_total", "stage" => "webm").increment(1);
        }
        self.invalidate(asset_id, &job.profile).await;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_rendition(
        &self,
        job: &TranscodeJob,
        profile: &EncodeProfile,
        kind: DerivativeKind,
        input: &Path,
        output: &Path,
        duration_ms: i64,
        source_etag: &str,
    ) -> WorkerResult<()> {
        let asset = job.source_asset_id;
        let inv = match kind {
            DerivativeKind::Mp4 => mp4_invocation(&self.config.ffmpeg_program, profile, input, output),
            DerivativeKind::Webm => webm_invocation(&self.config.ffmpeg_program, profile, input, output),
            DerivativeKind::Other => {
                return Err(WorkerError::job_failed("no encode stage for kind 'other'"))
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let updater = tokio::spawn(update_progress(
            self.ledger.clone(),
            asset,
            job.profile.clone(),
            kind,
            duration_ms,
            profile.progress_floor,
            rx,
        ));
        let sink: ProgressSink = Box::new(move |out_time_ms| {
            let _ = tx.send(out_time_ms);
        });

        let started = Instant::now();
        let result = run_encoder(&inv, Some(sink)).await;
        // The sink is dropped when the supervisor returns, which closes
        // the channel and ends the updater task.
        let _ = updater.await;
        result?;
        ensure_nonempty(output).await?;

        let reference = self.store.derived_ref(asset, &job.profile, kind);
        self.store.publish(output, &reference).await?;
        self.ledger
            .mark_ready(asset, &job.profile, kind, &reference, source_etag)
            .await?;
        self.invalidate(asset, &job.profile).await;

        histogram!("vderiv_stage_seconds", "stage" => kind.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(asset = %asset, kind = %kind, "rendition ready");
        Ok(())
    }

    /// Cache invalidation is best-effort: a cache outage must never turn a
    /// finished encode into a failed job.
    async fn invalidate(&self, asset: AssetId, profile: &str) {
        if let Err(e) = self.cache.invalidate(asset, profile).await {
            warn!(asset = %asset, profile, error = %e, "sources cache invalidation failed");
        }
    }
}

/// Map an encoder `out_time_ms` value to a stored progress percentage.
///
/// Clamped to [floor, 99] while the stage runs; 100 is written only by
/// `mark_ready`. With no known duration the percentage holds at the floor.
fn stage_progress(out_time_ms: i64, duration_ms: i64, floor: u8) -> u8 {
    if duration_ms <= 0 {
        return floor;
    }
    let pct = (out_time_ms.max(0).saturating_mul(100) / duration_ms).min(99) as u8;
    pct.max(floor)
}

async fn update_progress(
    ledger: Ledger,
    asset: AssetId,
    profile: String,
    kind: DerivativeKind,
    duration_ms: i64,
    floor: u8,
    mut rx: mpsc::UnboundedReceiver<i64>,
) {
    let mut last = 0u8;
    while let Some(out_time_ms) = rx.recv().await {
        let pct = stage_progress(out_time_ms, duration_ms, floor);
        if pct != last {
            last = pct;
            if let Err(e) = ledger.bump_progress(asset, &profile, kind, pct).await {
                warn!(asset = %asset, kind = %kind, error = %e, "progress update failed");
            }
        }
    }
}

/// Cheap content fingerprint of the source at processing time.
async fn source_fingerprint(path: &Path) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some(format!("{}-{}", meta.len(), mtime))
}
