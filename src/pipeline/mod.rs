//! Inbound email pipeline: classification and label application.

pub mod processor;

pub use processor::{EmailProcessor, ProcessedEmail};
