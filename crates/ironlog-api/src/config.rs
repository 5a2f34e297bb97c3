//! Runtime configuration read from the environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use ironlog_core::retry::RetryPolicy;
use ironlog_notifications::infrastructure::smtp::SmtpConfig;

use crate::error::AppError;

/// Whether producers signal the in-process job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Jobs run on the in-process runner.
    Async,
    /// Signals are dropped; rows stay pending for an operator.
    Disabled,
}

/// Which email sender the processor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSenderKind {
    /// Log the rendered message and report it as sent.
    Log,
    /// Deliver through an SMTP relay.
    Smtp,
    /// Decline every send; rows fail with "sender disabled".
    Disabled,
}

/// Server and pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub delivery_mode: DeliveryMode,
    pub email_sender: EmailSenderKind,
    /// Present when `email_sender` is [`EmailSenderKind::Smtp`].
    pub smtp: Option<SmtpConfig>,
    /// Feature flags switched off, e.g. `notifications.welcome`.
    pub disabled_notifications: Vec<String>,
    pub max_attempts: u32,
    pub job_workers: usize,
    pub job_queue_capacity: usize,
    pub dispatch_batch_size: u32,
    pub poll_interval: Duration,
    pub claim_timeout: Duration,
    pub sweep_grace: Duration,
}

impl Settings {
    /// Reads settings from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;

        let delivery_mode = match lookup("DELIVERY_MODE").as_deref() {
            None | Some("async") => DeliveryMode::Async,
            Some("disabled") => DeliveryMode::Disabled,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "DELIVERY_MODE must be async or disabled, got {other}"
                )));
            }
        };
        let email_sender = match lookup("EMAIL_SENDER").as_deref() {
            None | Some("log") => EmailSenderKind::Log,
            Some("smtp") => EmailSenderKind::Smtp,
            Some("disabled") => EmailSenderKind::Disabled,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "EMAIL_SENDER must be log, smtp or disabled, got {other}"
                )));
            }
        };
        let smtp = if email_sender == EmailSenderKind::Smtp {
            Some(smtp_config(&lookup)?)
        } else {
            None
        };

        let max_attempts: u32 = parse_or(&lookup, "MAX_ATTEMPTS", RetryPolicy::DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(AppError::Config("MAX_ATTEMPTS must be at least 1".into()));
        }
        let job_workers: usize = parse_or(&lookup, "JOB_WORKERS", 4)?;
        if job_workers == 0 {
            return Err(AppError::Config("JOB_WORKERS must be at least 1".into()));
        }

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            delivery_mode,
            email_sender,
            smtp,
            disabled_notifications: lookup("DISABLED_NOTIFICATIONS")
                .map(|flags| {
                    flags
                        .split(',')
                        .map(str::trim)
                        .filter(|flag| !flag.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            max_attempts,
            job_workers,
            job_queue_capacity: parse_or(&lookup, "JOB_QUEUE_CAPACITY", 1024)?,
            dispatch_batch_size: parse_or(&lookup, "DISPATCH_BATCH_SIZE", 50)?,
            poll_interval: Duration::from_millis(parse_or(&lookup, "POLL_INTERVAL_MS", 5_000)?),
            claim_timeout: Duration::from_secs(parse_or(&lookup, "CLAIM_TIMEOUT_SECS", 300)?),
            sweep_grace: Duration::from_secs(parse_or(&lookup, "SWEEP_GRACE_SECS", 60)?),
        })
    }

    /// Socket address the server binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Retry policy with the configured attempt ceiling.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.max_attempts)
    }
}

fn smtp_config(lookup: &impl Fn(&str) -> Option<String>) -> Result<SmtpConfig, AppError> {
    let required = |key: &str| {
        lookup(key).ok_or_else(|| AppError::Config(format!("{key} must be set when EMAIL_SENDER=smtp")))
    };
    Ok(SmtpConfig {
        host: required("SMTP_HOST")?,
        port: parse_or(lookup, "SMTP_PORT", 587)?,
        from: required("SMTP_FROM")?,
        username: lookup("SMTP_USERNAME"),
        password: lookup("SMTP_PASSWORD"),
        use_tls: parse_or(lookup, "SMTP_TLS", true)?,
    })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid: {e}"))),
    }
}
