use inventory_common::queue::QueueError;
use inventory_common::store::StoreError;
use thiserror::Error;

/// Errors local to one message. The message is left unacknowledged, so the queue
/// redelivers it until its redrive policy dead-letters it.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message body is malformed: {0}")]
    Malformed(String),
    #[error("message body has no {0} field")]
    MissingField(&'static str),
    #[error(transparent)]
    StoreWrite(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to receive messages: {0}")]
    Receive(#[from] QueueError),
    #[error("worker semaphore was closed")]
    SemaphoreClosed,
}
