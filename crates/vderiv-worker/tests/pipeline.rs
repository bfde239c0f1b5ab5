//! End-to-end pipeline tests against stub encoder binaries.
//!
//! The stubs stand in for ffmpeg/ffprobe through the worker's binary
//! override: they emit progress lines, write output files and exit with
//! whatever status the scenario needs. No broker is required; cache
//! invalidation degrades to a warning by design.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use vderiv_ledger::Ledger;
use vderiv_models::{AssetId, DerivativeKind, DerivativeState, SourceAsset};
use vderiv_queue::TranscodeJob;
use vderiv_store::{MediaStore, SourcesCache, StoreConfig};
use vderiv_worker::{TranscodePipeline, WorkerConfig};

const PROFILE: &str = "hero_mobile_v1";

/// Stub that succeeds at every stage and emits progress for the videos.
const FFMPEG_OK: &str = r#"
for last; do :; done
case "$last" in
  *.jpg)  printf poster > "$last" ;;
  *.mp4)  echo "out_time_ms=3000"; echo "out_time_ms=6000"; printf mp4data > "$last" ;;
  *.webm) echo "out_time_ms=9000"; printf webmdata > "$last" ;;
esac
exit 0
"#;

/// Stub whose WebM stage exits nonzero.
const FFMPEG_WEBM_FAILS: &str = r#"
for last; do :; done
case "$last" in
  *.jpg)  printf poster > "$last" ;;
  *.mp4)  echo "out_time_ms=6000"; printf mp4data > "$last" ;;
  *.webm) echo "vp9 exploded" 1>&2; exit 3 ;;
esac
exit 0
"#;

/// Stub whose poster stage exits nonzero.
const FFMPEG_POSTER_FAILS: &str = r#"
for last; do :; done
case "$last" in
  *.jpg) echo "no frame decoded" 1>&2; exit 1 ;;
  *)     printf data > "$last" ;;
esac
exit 0
"#;

const PROBE_OK: &str = "echo 12.0";
const PROBE_FAILS: &str = "echo broken 1>&2; exit 1";

struct Harness {
    pipeline: TranscodePipeline,
    ledger: Ledger,
    store: MediaStore,
    stub_dir: PathBuf,
    work_dir: PathBuf,
    root: TempDir,
}

fn write_stub(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    // Each stub drops a marker next to itself so tests can assert whether
    // it ever ran.
    let script = format!("#!/bin/sh\ntouch \"$(dirname \"$0\")/{name}.ran\"\n{body}\n");
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

async fn harness(ffmpeg_body: &str, probe_body: &str) -> Harness {
    let root = TempDir::new().unwrap();

    let media_root = root.path().join("media");
    fs::create_dir_all(media_root.join("documents")).unwrap();
    fs::write(media_root.join("documents/source.mp4"), b"raw source bytes").unwrap();

    let stub_dir = root.path().join("bin");
    fs::create_dir_all(&stub_dir).unwrap();
    let ffmpeg = write_stub(&stub_dir, "ffmpeg-stub", ffmpeg_body);
    let ffprobe = write_stub(&stub_dir, "ffprobe-stub", probe_body);

    let ledger = Ledger::connect(&format!(
        "sqlite://{}",
        root.path().join("ledger.db").display()
    ))
    .await
    .unwrap();

    let store = MediaStore::new(&StoreConfig {
        media_root: media_root.clone(),
        media_url_base: "/media".to_string(),
    })
    .unwrap();

    let cache = SourcesCache::new("redis://127.0.0.1:1").unwrap();

    let work_dir = root.path().join("work");
    let config = WorkerConfig {
        ffmpeg_program: ffmpeg,
        ffprobe_program: ffprobe,
        work_dir: work_dir.clone(),
        ..WorkerConfig::default()
    };

    let pipeline = TranscodePipeline::new(ledger.clone(), store.clone(), cache, config);

    Harness {
        pipeline,
        ledger,
        store,
        stub_dir,
        work_dir,
        root,
    }
}

impl Harness {
    async fn seed_asset(&self, id: i64, file_path: &str) -> AssetId {
        let asset = SourceAsset::new(id, file_path, "Seeded");
        self.ledger.upsert_source_asset(&asset).await.unwrap();
        for kind in [DerivativeKind::Mp4, DerivativeKind::Webm] {
            self.ledger.ensure(asset.id, PROFILE, kind).await.unwrap();
        }
        asset.id
    }

    fn stub_ran(&self, name: &str) -> bool {
        self.stub_dir.join(format!("{name}.ran")).exists()
    }
}

#[tokio::test]
async fn end_to_end_success() {
    let h = harness(FFMPEG_OK, PROBE_OK).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    let job = TranscodeJob::new(42, PROFILE);
    h.pipeline.run(&job).await.unwrap();

    let records = h.ledger.records_for(asset, PROFILE).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.state, DerivativeState::Ready);
        assert_eq!(record.progress, 100);
        assert!(!record.output_ref.is_empty());
        assert!(!record.poster_ref.is_empty());
        assert!(record.error.is_empty());
        assert_eq!(record.owning_job_id, job.job_id.as_str());
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        assert!(!record.source_etag.is_empty());
    }

    // Outputs are published into the derived tree
    let mp4 = records.iter().find(|r| r.kind == DerivativeKind::Mp4).unwrap();
    assert_eq!(mp4.output_ref, "derived/videos/42/hero_mobile_v1/video.mp4");
    assert_eq!(
        fs::read(h.store.absolute(&mp4.output_ref)).unwrap(),
        b"mp4data"
    );
    assert_eq!(
        fs::read(h.store.absolute(&mp4.poster_ref)).unwrap(),
        b"poster"
    );

    // The per-job scratch directory is gone
    assert_eq!(fs::read_dir(&h.work_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn optional_failure_preserves_the_required_rendition() {
    let h = harness(FFMPEG_WEBM_FAILS, PROBE_OK).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    // A WebM failure is not a job failure
    h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap();

    let mp4 = h.ledger.find(asset, PROFILE, DerivativeKind::Mp4).await.unwrap().unwrap();
    assert_eq!(mp4.state, DerivativeState::Ready);
    assert_eq!(mp4.progress, 100);
    assert!(!mp4.output_ref.is_empty());

    let webm = h.ledger.find(asset, PROFILE, DerivativeKind::Webm).await.unwrap().unwrap();
    assert_eq!(webm.state, DerivativeState::Failed);
    assert_eq!(webm.progress, 0);
    assert!(webm.error.contains("webm failed"));
    assert!(webm.error.contains("vp9 exploded"));
    assert!(webm.output_ref.is_empty());

    // The shared poster was attached to both rows before the failure
    assert!(!mp4.poster_ref.is_empty());
    assert!(!webm.poster_ref.is_empty());
}

#[tokio::test]
async fn poster_failure_fails_the_whole_job() {
    let h = harness(FFMPEG_POSTER_FAILS, PROBE_OK).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    let err = h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap_err();
    assert!(err.to_string().contains("poster"));

    for record in h.ledger.records_for(asset, PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Failed);
        assert_eq!(record.progress, 0);
        assert!(record.error.contains("transcode failed"));
        assert!(record.finished_at.is_some());
    }
}

#[tokio::test]
async fn duplicate_job_after_ready_is_a_noop() {
    let h = harness(FFMPEG_OK, PROBE_OK).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    let first = TranscodeJob::new(42, PROFILE);
    h.pipeline.run(&first).await.unwrap();

    // A stale duplicate claims zero rows and leaves the result alone
    h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap();

    for record in h.ledger.records_for(asset, PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Ready);
        assert_eq!(record.owning_job_id, first.job_id.as_str());
    }
}

#[tokio::test]
async fn failed_job_is_reprocessable() {
    let h = harness(FFMPEG_POSTER_FAILS, PROBE_OK).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap_err();

    // Swap the stub for a working one; the redelivered job re-claims the
    // Failed rows and completes.
    write_stub(&h.stub_dir, "ffmpeg-stub", FFMPEG_OK);
    h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap();

    for record in h.ledger.records_for(asset, PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Ready);
        assert_eq!(record.progress, 100);
        assert!(record.error.is_empty());
    }
}

#[tokio::test]
async fn probe_failure_degrades_progress_only() {
    let h = harness(FFMPEG_OK, PROBE_FAILS).await;
    let asset = h.seed_asset(42, "documents/source.mp4").await;

    h.pipeline.run(&TranscodeJob::new(42, PROFILE)).await.unwrap();

    for record in h.ledger.records_for(asset, PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Ready);
        assert_eq!(record.progress, 100);
    }
}

#[tokio::test]
async fn escaping_source_path_aborts_before_any_subprocess() {
    let h = harness(FFMPEG_OK, PROBE_OK).await;

    // A real file outside the media root, reachable by traversal
    fs::write(h.root.path().join("escape.mp4"), b"outside").unwrap();
    let asset = h.seed_asset(43, "../escape.mp4").await;

    let err = h.pipeline.run(&TranscodeJob::new(43, PROFILE)).await.unwrap_err();
    assert!(err.to_string().contains("outside the storage root"));

    for record in h.ledger.records_for(asset, PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Failed);
        assert!(record.error.contains("outside the storage root"));
    }

    // Neither the probe nor the encoder ever ran
    assert!(!h.stub_ran("ffprobe-stub"));
    assert!(!h.stub_ran("ffmpeg-stub"));
}

#[tokio::test]
async fn missing_asset_registration_fails_the_job() {
    let h = harness(FFMPEG_OK, PROBE_OK).await;

    // Rows exist but no source asset row: the job fails visibly
    for kind in [DerivativeKind::Mp4, DerivativeKind::Webm] {
        h.ledger.ensure(AssetId(99), PROFILE, kind).await.unwrap();
    }

    let err = h.pipeline.run(&TranscodeJob::new(99, PROFILE)).await.unwrap_err();
    assert!(err.to_string().contains("no source asset registered"));

    for record in h.ledger.records_for(AssetId(99), PROFILE).await.unwrap() {
        assert_eq!(record.state, DerivativeState::Failed);
        assert!(!record.error.is_empty());
    }
}
