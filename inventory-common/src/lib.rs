//! Shared building blocks for the inventory ingestion services.
//!
//! The producer turns uploaded CSV objects into queue messages, the consumer turns queue
//! messages into store records. Everything both sides need to agree on lives here: the
//! message model, the queue transport contract (including its redrive policy), the store
//! contract and the object sources the producer reads from.
pub mod event;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod redrive;
pub mod source;
pub mod store;
