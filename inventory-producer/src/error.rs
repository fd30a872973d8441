use inventory_common::queue::QueueError;
use inventory_common::source::SourceError;
use thiserror::Error;

/// Errors that abort a producer run.
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error(transparent)]
    SourceRead(#[from] SourceReadError),
    #[error("batch {batch} was rejected by the queue: {error}")]
    Transport { batch: usize, error: QueueError },
    #[error("row {row} could not be serialized: {error}")]
    Serialize { row: usize, error: serde_json::Error },
}

/// The input could not be turned into records.
#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("failed to fetch object: {0}")]
    Fetch(#[from] SourceError),
    #[error("input is not valid UTF-8 after byte {valid_up_to}")]
    Decode { valid_up_to: usize },
    #[error("failed to parse delimited input: {0}")]
    Parse(#[from] csv::Error),
    #[error("header column {column} at position {position} is reserved for extra fields")]
    ReservedColumn { column: String, position: usize },
}
