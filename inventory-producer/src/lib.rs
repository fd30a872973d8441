pub mod batch;
pub mod config;
pub mod error;
pub mod handlers;
pub mod parse;
pub mod producer;
