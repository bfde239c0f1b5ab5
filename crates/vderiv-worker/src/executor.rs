//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use vderiv_queue::{JobQueue, TranscodeJob};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::pipeline::TranscodePipeline;

/// Consumes jobs from the queue and runs them through the pipeline,
/// strictly one at a time: stages are sequentially dependent and the
/// encoder saturates the host, so workers are provisioned one job each.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: TranscodePipeline,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, pipeline: TranscodePipeline) -> Self {
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            pipeline,
            shutdown,
            consumer_name,
        }
    }

    /// Ask the run loop to stop after the in-flight job.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("Starting job executor '{}'", self.consumer_name);

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically re-deliver entries whose consumer died mid-job
        let mut claim_timer = tokio::time::interval(self.config.claim_interval);
        claim_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                _ = claim_timer.tick() => {
                    match self.queue.claim_stale(&self.consumer_name, 5).await {
                        Ok(jobs) if !jobs.is_empty() => {
                            info!("Claimed {} stale jobs", jobs.len());
                            for (message_id, job) in jobs {
                                self.execute_job(message_id, job).await;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim stale jobs: {}", e),
                    }
                }
                result = self.queue.consume(&self.consumer_name, self.config.consume_block_ms, 1) => {
                    match result {
                        Ok(jobs) => {
                            for (message_id, job) in jobs {
                                self.execute_job(message_id, job).await;
                            }
                        }
                        Err(e) => {
                            error!("Error consuming jobs: {}", e);
                            // Back off on error
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(&self, message_id: String, job: TranscodeJob) {
        info!("Executing job {} ({})", job.job_id, job.work_key());

        match self.pipeline.run(&job).await {
            Ok(()) => {
                info!("Job {} completed", job.job_id);
                if let Err(e) = self.queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job.job_id, e);
                }
            }
            Err(e) => {
                error!("Job {} failed: {}", job.job_id, e);

                let retries = self.queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                if retries >= self.queue.max_retries() {
                    if let Err(de) = self.queue.dlq(&message_id, &job, &e.to_string()).await {
                        error!("Failed to move job {} to DLQ: {}", job.job_id, de);
                    }
                } else {
                    // Left unacked on purpose: the visibility timeout
                    // redelivers it, and the Failed rows are re-claimable.
                    warn!(
                        "Job {} will be redelivered (attempt {}/{})",
                        job.job_id,
                        retries,
                        self.queue.max_retries()
                    );
                }
            }
        }
    }
}
