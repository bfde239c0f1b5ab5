//! Transcode worker binary.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vderiv_ledger::Ledger;
use vderiv_queue::JobQueue;
use vderiv_store::{MediaStore, SourcesCache, StoreConfig};
use vderiv_worker::{JobExecutor, TranscodePipeline, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vderiv=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vderiv-worker");

    // Load configuration
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    // Fail fast when the encoder toolchain is missing
    for program in [&config.ffmpeg_program, &config.ffprobe_program] {
        if which::which(program).is_err() {
            error!("Required binary not found in PATH: {}", program);
            std::process::exit(1);
        }
    }

    // Install the Prometheus metrics recorder
    let _metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    // Create queue client
    let queue = match JobQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    // Open the ledger
    let ledger = match Ledger::connect(&config.ledger_url).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to open ledger: {}", e);
            std::process::exit(1);
        }
    };

    // Media store and sources cache
    let store = match MediaStore::new(&StoreConfig::from_env()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open media store: {}", e);
            std::process::exit(1);
        }
    };
    let cache = match SourcesCache::new(&config.redis_url) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create sources cache: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = TranscodePipeline::new(ledger, store, cache, config.clone());
    let executor = Arc::new(JobExecutor::new(config, Arc::clone(&queue), pipeline));

    // Setup signal handler
    let executor_for_signal = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        executor_for_signal.request_shutdown();
    });

    // Run executor
    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
