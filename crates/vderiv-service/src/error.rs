//! Service error types.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown encode profile: {0}")]
    UnknownProfile(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] vderiv_ledger::LedgerError),

    #[error("Queue error: {0}")]
    Queue(#[from] vderiv_queue::QueueError),

    #[error("Store error: {0}")]
    Store(#[from] vderiv_store::StoreError),
}
