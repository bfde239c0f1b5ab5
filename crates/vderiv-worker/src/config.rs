//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Ledger database URL
    pub ledger_url: String,
    /// Redis URL for the sources cache
    pub redis_url: String,
    /// Scratch directory for per-job temporary encoder output
    pub work_dir: PathBuf,
    /// Transcoder binary (overridable for tests and constrained hosts)
    pub ffmpeg_program: String,
    /// Probe binary
    pub ffprobe_program: String,
    /// How often to look for stale delivered-but-unacked queue entries
    pub claim_interval: Duration,
    /// How long one queue read blocks waiting for a job
    pub consume_block_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ledger_url: "sqlite://vderiv.db".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            work_dir: PathBuf::from("/tmp/vderiv"),
            ffmpeg_program: "ffmpeg".to_string(),
            ffprobe_program: "ffprobe".to_string(),
            claim_interval: Duration::from_secs(30),
            consume_block_ms: 1000,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            ledger_url: std::env::var("VDERIV_DB")
                .unwrap_or_else(|_| "sqlite://vderiv.db".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vderiv")),
            ffmpeg_program: std::env::var("VDERIV_FFMPEG")
                .unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_program: std::env::var("VDERIV_FFPROBE")
                .unwrap_or_else(|_| "ffprobe".to_string()),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            consume_block_ms: std::env::var("WORKER_CONSUME_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }
}
