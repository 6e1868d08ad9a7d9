//! Email Ops: label-triggered email automation.

pub mod api;
pub mod automation;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod store;
pub mod tasks;
pub mod worker;
