//! Background automation workers.
//!
//! - `job`: jobs accepted by the queue
//! - `queue`: bounded queue and worker pool

pub mod job;
pub mod queue;

pub use job::AutomationJob;
pub use queue::{AutomationQueue, WorkerDeps, spawn_workers};
