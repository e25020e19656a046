use thiserror::Error;

use crate::{
    dao::{broker::BrokerError, storage::StorageError},
    services::queue::QueueError,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Durable store is unavailable or refused the operation.
    #[error("storage unavailable")]
    Storage(#[source] StorageError),
    /// Broker command failed.
    #[error("broker unavailable")]
    Broker(#[source] BrokerError),
    /// A task could not be queued.
    #[error("task queue unavailable")]
    Queue(#[source] QueueError),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err)
    }
}

impl From<BrokerError> for ServiceError {
    fn from(err: BrokerError) -> Self {
        ServiceError::Broker(err)
    }
}

impl From<QueueError> for ServiceError {
    fn from(err: QueueError) -> Self {
        ServiceError::Queue(err)
    }
}
