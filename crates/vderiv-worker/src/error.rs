//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Unknown encode profile: {0}")]
    UnknownProfile(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] vderiv_ledger::LedgerError),

    #[error("Media error: {0}")]
    Media(#[from] vderiv_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] vderiv_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vderiv_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }
}
