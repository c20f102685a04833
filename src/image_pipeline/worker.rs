//! Background runner for queued image tasks.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::storer::{ImageStorer, StoreOutcome};
use super::task_queue::{ImageTask, ImageTaskStore, TaskStatus};
use crate::server::metrics;

/// Runs image tasks one at a time, oldest first.
pub struct ImageWorker {
    tasks: Arc<dyn ImageTaskStore>,
    storer: Arc<ImageStorer>,
    poll_interval: Duration,
}

impl ImageWorker {
    pub fn new(
        tasks: Arc<dyn ImageTaskStore>,
        storer: Arc<ImageStorer>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tasks,
            storer,
            poll_interval,
        }
    }

    /// Claims and runs the next READY task. Returns `None` when the queue is
    /// empty.
    pub async fn run_one(&self) -> Result<Option<(ImageTask, TaskStatus)>> {
        let Some(task) = self.tasks.claim_next()? else {
            return Ok(None);
        };
        debug!(
            "Running image task {} {} {:?}",
            task.id,
            task.kind.as_str(),
            task.entity_id
        );

        let status = match self.storer.store(task.kind.owner(), task.entity_id).await {
            Ok(outcome) => {
                if let StoreOutcome::Abandoned = outcome {
                    debug!("Image task {} abandoned its image", task.id);
                }
                self.tasks.mark_succeeded(task.id)?;
                TaskStatus::Succeeded
            }
            Err(e) => {
                warn!("Image task {} failed: {:#}", task.id, e);
                self.tasks.mark_failed(task.id, &format!("{:#}", e))?;
                TaskStatus::Failed
            }
        };
        metrics::record_image_task(task.kind.as_str(), status.as_str());
        self.update_queue_gauge();
        Ok(Some((task, status)))
    }

    /// Runs READY tasks until the queue is empty or `max_tasks` were run.
    /// Returns how many tasks ran.
    pub async fn run_pending(&self, max_tasks: Option<usize>) -> Result<usize> {
        let mut count = 0;
        while max_tasks.map_or(true, |max| count < max) {
            if self.run_one().await?.is_none() {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Polls the queue until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Image worker starting (poll_interval={}ms)",
            self.poll_interval.as_millis()
        );

        match self.tasks.requeue_running() {
            Ok(0) => {}
            Ok(n) => info!("Requeued {} interrupted image tasks", n),
            Err(e) => error!("Failed to requeue interrupted image tasks: {}", e),
        }

        loop {
            tokio::select! {
                result = self.run_pending(None) => {
                    match result {
                        Ok(0) => {}
                        Ok(n) => info!("Image worker ran {} tasks", n),
                        Err(e) => error!("Image worker error: {:#}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Image worker shutting down");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Image worker shutting down");
                    break;
                }
            }
        }
    }

    fn update_queue_gauge(&self) {
        if let Ok(ready) = self.tasks.count_by_status(TaskStatus::Ready) {
            metrics::set_image_queue_ready(ready);
        }
    }
}
