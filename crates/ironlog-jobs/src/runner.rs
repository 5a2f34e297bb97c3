//! Job runner: dispatches queued jobs to their handlers.

use std::collections::HashMap;
use std::sync::Arc;

use ironlog_core::job::{JobHandler, JobRequest};
use ironlog_core::retry::RetryPolicy;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Tuning for [`JobRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobRunnerConfig {
    /// Jobs running at once.
    pub workers: usize,
    /// Re-runs of a failing job before the runner gives up on it.
    pub max_retries: u32,
    /// Supplies the delay between re-runs when the handler cannot say when
    /// the item is due.
    pub retry: RetryPolicy,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: RetryPolicy::DEFAULT_MAX_ATTEMPTS - 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Runs jobs from a [`JobQueue`](crate::queue::JobQueue) on registered
/// handlers, at most `workers` at a time.
pub struct JobRunner {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: JobRunnerConfig,
}

impl JobRunner {
    #[must_use]
    pub fn new(config: JobRunnerConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    /// Registers `handler` for its `handler_type`, replacing any previous
    /// handler of that type.
    #[must_use]
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.handler_type(), handler);
        self
    }

    /// Runs on a new task until `cancel` fires or the queue closes.
    #[must_use]
    pub fn spawn(self, queue: crate::queue::JobQueue, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(queue, cancel))
    }

    /// Receives and runs jobs until `cancel` fires or the queue closes, then
    /// waits for in-flight jobs to finish.
    pub async fn run(self, mut queue: crate::queue::JobQueue, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let config = Arc::new(self.config);
        let mut in_flight = JoinSet::new();
        tracing::info!(workers = config.workers, "job runner started");

        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = queue.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let Some(handler) = self.handlers.get(job.handler_type.as_str()).cloned() else {
                tracing::warn!(%job, "no handler registered for job");
                continue;
            };
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let config = Arc::clone(&config);
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                run_job(handler.as_ref(), &job, &config, &cancel).await;
            });

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "job task panicked");
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "job runner draining");
        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                tracing::error!(error = %e, "job task panicked");
            }
        }
        tracing::info!("job runner stopped");
    }
}

async fn run_job(
    handler: &dyn JobHandler,
    job: &JobRequest,
    config: &JobRunnerConfig,
    cancel: &CancellationToken,
) {
    let mut retries = 0;
    loop {
        let err = match handler.run(job.work_item_id, cancel).await {
            Ok(()) => {
                tracing::debug!(%job, "job completed");
                return;
            }
            Err(err) => err,
        };
        if !err.is_retryable() {
            tracing::info!(%job, error = %err, "job not retried");
            return;
        }
        if retries >= config.max_retries {
            tracing::warn!(%job, retries, error = %err, "job retries exhausted");
            return;
        }
        retries += 1;
        let delay = match handler.retry_after(job.work_item_id).await {
            Ok(Some(delay)) => delay,
            Ok(None) => {
                tracing::info!(%job, error = %err, "no further attempt scheduled; job not retried");
                return;
            }
            Err(lookup) => {
                tracing::warn!(%job, error = %lookup, "could not read retry time");
                config.retry.nominal_delay(retries)
            }
        };
        tracing::warn!(%job, retry = retries, delay = ?delay, error = %err, "job failed, retrying");
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}
