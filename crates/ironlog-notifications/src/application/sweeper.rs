//! Reconciliation sweep.
//!
//! Trigger signals are advisory. The sweep re-discovers work the trigger
//! lost: claims abandoned by a crashed worker are expired, and ready rows
//! that have sat untouched for longer than the grace period are signalled
//! again.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use ironlog_core::clock::Clock;
use ironlog_core::error::PipelineError;
use ironlog_core::job::{BackgroundTrigger, JobRequest};
use ironlog_core::repository::NotificationStore;
use ironlog_core::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

/// Tuning for [`NotificationSweeper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Maximum rows signalled per sweep.
    pub batch_size: u32,
    /// Pause between sweeps in [`NotificationSweeper::run`].
    pub interval: Duration,
    /// How long a row may stay `processing` before its claim is expired.
    pub claim_timeout: Duration,
    /// How long a ready row is left to its original signal before the
    /// sweep signals it again.
    pub grace: Duration,
    /// Attempt ceiling; expired claims at the ceiling are not re-armed.
    pub max_attempts: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(300),
            grace: Duration::from_secs(60),
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Stale claims moved to `failed`.
    pub expired: u64,
    /// Ready rows signalled.
    pub enqueued: usize,
}

/// Periodically re-signals notifications whose trigger signal was lost.
pub struct NotificationSweeper {
    store: Arc<dyn NotificationStore>,
    trigger: Arc<dyn BackgroundTrigger>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

impl NotificationSweeper {
    /// Creates a sweeper.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        trigger: Arc<dyn BackgroundTrigger>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            trigger,
            clock,
            config,
        }
    }

    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the store fails.
    pub async fn sweep_once(&self) -> Result<SweepReport, PipelineError> {
        let now = self.clock.now();
        let stale_before = now - delta(self.config.claim_timeout);
        let expired = self
            .store
            .expire_claims(stale_before, now, self.config.max_attempts)
            .await?;
        if expired > 0 {
            tracing::warn!(expired, "expired stale notification claims");
        }

        let settled_before = now - delta(self.config.grace);
        let ready = self.store.list_ready(self.config.batch_size, now).await?;
        let mut enqueued = 0;
        for record in ready.iter().filter(|r| r.updated_at <= settled_before) {
            self.trigger.enqueue(JobRequest::notification(record.id));
            enqueued += 1;
        }
        if enqueued > 0 {
            tracing::info!(enqueued, "re-signalled ready notifications");
        }

        Ok(SweepReport { expired, enqueued })
    }

    /// Sweeps every `interval` until cancelled. Failed sweeps are logged and
    /// retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "notification sweeper started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "notification sweep failed");
                    }
                }
            }
        }
        tracing::info!("notification sweeper stopped");
    }
}
