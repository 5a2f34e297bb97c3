//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ironlog_api::config::Settings;
use ironlog_api::pipeline::{Pipeline, PipelineDeps};
use ironlog_api::routes;
use ironlog_api::state::AppState;
use ironlog_core::clock::Clock;
use ironlog_core::job::BackgroundTrigger;
use ironlog_core::repository::{EventStore, NotificationStore};
use ironlog_notifications::domain::message::Sender;
use ironlog_notifications::infrastructure::senders::LogSender;
use ironlog_store::pg_event_store::PgEventStore;
use ironlog_store::pg_notification_store::PgNotificationStore;
use ironlog_test_support::{FixedClock, RecordingTrigger};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::PgPool;
use tower::ServiceExt;

/// Fixed timestamp used across all integration tests.
pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Settings with defaults for everything but the database URL.
pub fn test_settings() -> Settings {
    Settings::from_lookup(|key| (key == "DATABASE_URL").then(|| "postgres://localhost/test".to_owned()))
        .unwrap()
}

/// The router together with the services behind it.
pub struct TestApp {
    pub router: Router,
    pub pipeline: Pipeline,
    pub settings: Settings,
}

/// Collaborators for [`build_app`].
pub struct TestDeps {
    pub notifications: Arc<dyn NotificationStore>,
    pub events: Arc<dyn EventStore>,
    pub trigger: Arc<dyn BackgroundTrigger>,
    pub sender: Arc<dyn Sender>,
    pub clock: Arc<dyn Clock>,
    pub metrics: PrometheusHandle,
}

impl TestDeps {
    /// Deps over the given stores with a recording trigger, log sender and
    /// fixed clock.
    pub fn new(notifications: Arc<dyn NotificationStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            notifications,
            events,
            trigger: Arc::new(RecordingTrigger::new()),
            sender: Arc::new(LogSender),
            clock: fixed_clock(),
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        }
    }
}

/// Build the full app router the way `main.rs` does.
pub fn build_app(deps: TestDeps) -> TestApp {
    let settings = test_settings();
    let pipeline = Pipeline::build(
        &settings,
        PipelineDeps {
            notifications: Arc::clone(&deps.notifications),
            events: Arc::clone(&deps.events),
            trigger: deps.trigger,
            sender: deps.sender,
            clock: deps.clock,
        },
    )
    .unwrap();
    let state = AppState::new(
        deps.notifications,
        deps.events,
        &pipeline,
        deps.metrics,
        settings.max_attempts,
    );
    TestApp {
        router: routes::router(state),
        pipeline,
        settings,
    }
}

/// Build the full app over PostgreSQL stores.
pub fn build_test_app(pool: PgPool) -> TestApp {
    build_app(TestDeps::new(
        Arc::new(PgNotificationStore::new(pool.clone())),
        Arc::new(PgEventStore::new(pool)),
    ))
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the raw response body.
pub async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    (status, String::from_utf8(body_bytes.to_vec()).unwrap())
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, text) = get_text(app, uri).await;
    (status, serde_json::from_str(&text).unwrap())
}
