//! Wires stores, trigger and sender into the pipeline services.

use std::sync::Arc;

use ironlog_core::clock::Clock;
use ironlog_core::job::{BackgroundTrigger, JobHandler};
use ironlog_core::repository::{EventStore, NotificationStore};
use ironlog_events::application::dispatcher::{DeliveryDispatcher, DispatcherConfig};
use ironlog_events::application::publisher::EventPublisher;
use ironlog_events::domain::registry::HandlerRegistry;
use ironlog_events::infrastructure::audit::AuditLogHandler;
use ironlog_jobs::runner::{JobRunner, JobRunnerConfig};
use ironlog_notifications::application::processor::NotificationProcessor;
use ironlog_notifications::application::scheduler::NotificationScheduler;
use ironlog_notifications::application::sweeper::{NotificationSweeper, SweeperConfig};
use ironlog_notifications::domain::flags::StaticFeatureFlags;
use ironlog_notifications::domain::message::Sender;
use ironlog_notifications::infrastructure::senders::{DisabledSender, LogSender};
use ironlog_notifications::infrastructure::smtp::SmtpSender;
use ironlog_notifications::infrastructure::templates::standard_catalog;

use crate::config::{EmailSenderKind, Settings};
use crate::error::AppError;
use crate::registration::{USER_REGISTERED, WelcomeOnRegistration};

/// Event types written to the audit log.
pub const AUDITED_EVENT_TYPES: &[&str] = &[USER_REGISTERED, "training.completed", "plan.shared"];

/// Storage and side-effect collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub notifications: Arc<dyn NotificationStore>,
    pub events: Arc<dyn EventStore>,
    pub trigger: Arc<dyn BackgroundTrigger>,
    pub sender: Arc<dyn Sender>,
    pub clock: Arc<dyn Clock>,
}

/// Producers, processors and background loops sharing one configuration.
#[derive(Clone)]
pub struct Pipeline {
    pub scheduler: Arc<NotificationScheduler>,
    pub publisher: Arc<EventPublisher>,
    pub processor: Arc<NotificationProcessor>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    pub sweeper: Arc<NotificationSweeper>,
}

impl Pipeline {
    /// Builds every service from `deps` under `settings`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the built-in templates fail to parse.
    pub fn build(settings: &Settings, deps: PipelineDeps) -> Result<Self, AppError> {
        let retry = settings.retry_policy();
        let catalog = Arc::new(
            standard_catalog().map_err(|e| AppError::Config(format!("templates: {e}")))?,
        );

        let scheduler = Arc::new(
            NotificationScheduler::new(
                Arc::clone(&deps.notifications),
                Arc::clone(&deps.trigger),
                Arc::clone(&deps.clock),
            )
            .with_flags(Arc::new(StaticFeatureFlags::with_disabled(
                settings.disabled_notifications.iter().cloned(),
            )))
            .with_catalog(Arc::clone(&catalog))
            .with_max_manual_requeue_attempts(settings.max_attempts),
        );

        let mut registry = HandlerRegistry::new().subscribe(
            USER_REGISTERED,
            Arc::new(WelcomeOnRegistration::new(Arc::clone(&scheduler))),
        );
        for event_type in AUDITED_EVENT_TYPES {
            registry = registry.subscribe(*event_type, Arc::new(AuditLogHandler));
        }
        let registry = Arc::new(registry);

        let publisher = Arc::new(
            EventPublisher::new(
                Arc::clone(&deps.events),
                Arc::clone(&registry),
                Arc::clone(&deps.trigger),
                Arc::clone(&deps.clock),
            )
            .with_max_manual_requeue_attempts(settings.max_attempts),
        );

        let processor = Arc::new(
            NotificationProcessor::new(
                Arc::clone(&deps.notifications),
                catalog,
                deps.sender,
                Arc::clone(&deps.clock),
            )
            .with_retry_policy(retry.clone()),
        );

        let dispatcher = Arc::new(DeliveryDispatcher::new(
            deps.events,
            registry,
            Arc::clone(&deps.clock),
            DispatcherConfig {
                batch_size: settings.dispatch_batch_size,
                poll_interval: settings.poll_interval,
                claim_timeout: settings.claim_timeout,
                retry,
            },
        ));

        let sweeper = Arc::new(NotificationSweeper::new(
            deps.notifications,
            deps.trigger,
            deps.clock,
            SweeperConfig {
                batch_size: settings.dispatch_batch_size,
                interval: settings.poll_interval,
                claim_timeout: settings.claim_timeout,
                grace: settings.sweep_grace,
                max_attempts: settings.max_attempts,
            },
        ));

        Ok(Self {
            scheduler,
            publisher,
            processor,
            dispatcher,
            sweeper,
        })
    }

    /// A job runner serving the notification and delivery jobs.
    #[must_use]
    pub fn job_runner(&self, settings: &Settings) -> JobRunner {
        let processor: Arc<dyn JobHandler> = self.processor.clone();
        let dispatcher: Arc<dyn JobHandler> = self.dispatcher.clone();
        JobRunner::new(JobRunnerConfig {
            workers: settings.job_workers,
            max_retries: settings.max_attempts.saturating_sub(1),
            retry: settings.retry_policy(),
        })
        .register(processor)
        .register(dispatcher)
    }
}

/// The email sender selected by `EMAIL_SENDER`.
///
/// # Errors
///
/// Returns `AppError::Config` if the SMTP relay cannot be configured.
pub fn build_sender(settings: &Settings) -> Result<Arc<dyn Sender>, AppError> {
    match (settings.email_sender, &settings.smtp) {
        (EmailSenderKind::Log, _) => Ok(Arc::new(LogSender)),
        (EmailSenderKind::Disabled, _) => Ok(Arc::new(DisabledSender)),
        (EmailSenderKind::Smtp, Some(smtp)) => {
            let sender = SmtpSender::new(smtp).map_err(|e| AppError::Config(format!("smtp: {e}")))?;
            Ok(Arc::new(sender))
        }
        (EmailSenderKind::Smtp, None) => {
            Err(AppError::Config("EMAIL_SENDER=smtp requires SMTP settings".into()))
        }
    }
}
