//! Follow-up tasks created from emails.

pub mod model;
pub mod service;

pub use model::{Task, TaskStatus};
pub use service::ensure_task_for_email;
