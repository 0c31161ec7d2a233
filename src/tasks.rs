//! Background task runner.
//!
//! Work that must outlive the request that started it (orchestration, chunk
//! cleanup, the periodic sweep) is handed to a [`TaskRunner`] instead of being
//! spawned ad hoc. The runner tracks every task so the server can drain them
//! on shutdown, and caps how many orchestration jobs run at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Tracks detached tasks and owns their shutdown.
#[derive(Clone)]
pub struct TaskRunner {
    tracker: TaskTracker,
    cancel: CancellationToken,
    job_permits: Arc<Semaphore>,
}

impl TaskRunner {
    /// Create a runner allowing `max_concurrent_jobs` jobs to run at once.
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            job_permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Submit a job. Jobs queue for a concurrency permit before running.
    ///
    /// Returns `false` if the runner is shutting down and the job was dropped.
    pub fn spawn_job<F>(&self, name: &str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!("Rejected job {} during shutdown", name);
            return false;
        }

        let permits = self.job_permits.clone();
        let span = info_span!("job", name = %name);
        self.tracker.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                debug!("Job started");
                job.await;
                debug!("Job finished");
            }
            .instrument(span),
        );
        true
    }

    /// Submit lightweight background work that does not count against the
    /// job limit (cleanup, periodic maintenance).
    pub fn spawn<F>(&self, name: &str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!("Rejected task {} during shutdown", name);
            return false;
        }

        self.tracker
            .spawn(task.instrument(info_span!("task", name = %name)));
        true
    }

    /// Token cancelled when shutdown begins. Long-running loops select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Number of tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until no tracked task is left. The runner stays open meanwhile:
    /// work submitted during the wait is accepted and waited for as well.
    ///
    /// Never returns while a long-running loop is tracked.
    pub async fn wait_idle(&self) {
        while !self.tracker.is_empty() {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Stop accepting work, cancel loops, and wait up to `grace` for
    /// in-flight tasks. Returns `true` if everything finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        self.cancel.cancel();

        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} background tasks to finish", pending);
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "{} background tasks still running after {:?}",
                    self.tracker.len(),
                    grace
                );
                false
            }
        }
    }
}
