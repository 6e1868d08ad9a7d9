//! In-process automation queue drained by a pool of workers.
//!
//! Jobs are processed one at a time per worker. Workers hold only a weak
//! handle to the queue for follow-up jobs, so they stop once every
//! [`AutomationQueue`] clone is dropped and the backlog is drained.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::automation::orchestrator::Orchestrator;
use crate::error::QueueError;
use crate::pipeline::EmailProcessor;
use crate::worker::job::AutomationJob;

/// Producer handle for automation jobs.
#[derive(Clone)]
pub struct AutomationQueue {
    tx: mpsc::Sender<AutomationJob>,
}

impl AutomationQueue {
    /// Bounded queue and the receiver to hand to [`spawn_workers`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AutomationJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting; fails when the queue is full or closed.
    pub fn enqueue(&self, job: AutomationJob) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })?;
        debug!(kind = job.kind(), email_id = %job.email_id(), "Job enqueued");
        Ok(())
    }

    fn downgrade(&self) -> mpsc::WeakSender<AutomationJob> {
        self.tx.downgrade()
    }
}

/// Services the workers call into.
#[derive(Clone)]
pub struct WorkerDeps {
    pub processor: Arc<EmailProcessor>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Spawn `count` workers sharing one receiver.
pub fn spawn_workers(
    count: usize,
    queue: &AutomationQueue,
    rx: mpsc::Receiver<AutomationJob>,
    deps: WorkerDeps,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let deps = deps.clone();
            let follow_ups = queue.downgrade();
            tokio::spawn(async move { worker_loop(worker_id, rx, deps, follow_ups).await })
        })
        .collect()
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<AutomationJob>>>,
    deps: WorkerDeps,
    follow_ups: mpsc::WeakSender<AutomationJob>,
) {
    info!(worker_id, "Automation worker started");
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        handle_job(worker_id, job, &deps, &follow_ups).await;
    }
    info!(worker_id, "Automation worker stopped");
}

async fn handle_job(
    worker_id: usize,
    job: AutomationJob,
    deps: &WorkerDeps,
    follow_ups: &mpsc::WeakSender<AutomationJob>,
) {
    debug!(worker_id, kind = job.kind(), email_id = %job.email_id(), "Job started");
    match job {
        AutomationJob::ProcessEmail { email_id } => {
            let processed = match deps.processor.process(email_id).await {
                Ok(processed) => processed,
                Err(e) => {
                    error!(worker_id, %email_id, kind = e.kind(), error = %e, "Email processing failed");
                    return;
                }
            };
            for label in processed.applied_labels {
                let follow_up = AutomationJob::TriggerLabel {
                    label_id: label.id,
                    email_id,
                };
                // Run inline rather than drop the job when the queue is
                // saturated or shutting down.
                let queued = follow_ups
                    .upgrade()
                    .is_some_and(|tx| tx.try_send(follow_up).is_ok());
                if !queued {
                    debug!(worker_id, label = %label.name, "Running label inline");
                    run_label(worker_id, label.id, email_id, deps).await;
                }
            }
        }
        AutomationJob::TriggerLabel { label_id, email_id } => {
            run_label(worker_id, label_id, email_id, deps).await;
        }
    }
}

async fn run_label(worker_id: usize, label_id: Uuid, email_id: Uuid, deps: &WorkerDeps) {
    match deps.orchestrator.run(label_id, email_id).await {
        Ok(run) => {
            info!(worker_id, run_id = %run.id, state = %run.state, "Label automation finished");
        }
        Err(e) => {
            error!(worker_id, %label_id, %email_id, error = %e, "Label automation could not run");
        }
    }
}
