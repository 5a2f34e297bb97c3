//! Route modules and the assembled router.

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod events;
pub mod health;
pub mod metrics;
pub mod notifications;

/// The full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .nest("/api/v1/notifications", notifications::router())
        .nest("/api/v1/events", events::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_app_state(
    notifications: std::sync::Arc<dyn ironlog_core::repository::NotificationStore>,
    events: std::sync::Arc<dyn ironlog_core::repository::EventStore>,
) -> AppState {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use ironlog_notifications::infrastructure::senders::LogSender;
    use ironlog_test_support::{FixedClock, RecordingTrigger};
    use metrics_exporter_prometheus::PrometheusBuilder;

    use crate::config::Settings;
    use crate::pipeline::{Pipeline, PipelineDeps};

    let settings = Settings::from_lookup(|key| {
        (key == "DATABASE_URL").then(|| "postgres://localhost/test".to_owned())
    })
    .unwrap();
    let pipeline = Pipeline::build(
        &settings,
        PipelineDeps {
            notifications: Arc::clone(&notifications),
            events: Arc::clone(&events),
            trigger: Arc::new(RecordingTrigger::new()),
            sender: Arc::new(LogSender),
            clock: Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())),
        },
    )
    .unwrap();
    let metrics = PrometheusBuilder::new().build_recorder().handle();
    AppState::new(notifications, events, &pipeline, metrics, settings.max_attempts)
}
