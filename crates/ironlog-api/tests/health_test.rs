//! Integration tests for the health and metrics endpoints.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use ironlog_core::metrics::{CounterMetrics, MetricsSink, WorkItemFamily};
use ironlog_test_support::{FailingStore, InMemoryEventStore, InMemoryNotificationStore};
use metrics_exporter_prometheus::PrometheusBuilder;

fn in_memory_deps() -> common::TestDeps {
    common::TestDeps::new(
        Arc::new(InMemoryNotificationStore::new()),
        Arc::new(InMemoryEventStore::new()),
    )
}

#[tokio::test]
async fn test_health_returns_200_with_status_ok() {
    let app = common::build_app(in_memory_deps());

    let (status, json) = common::get_json(app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = common::build_app(in_memory_deps());

    let (status, _) = common::get_text(app.router, "/api/v1/nonexistent").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_renders_pipeline_counters() {
    // Arrange
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        CounterMetrics.enqueued(WorkItemFamily::Notification, "user.registration.welcome");
        CounterMetrics.failed(WorkItemFamily::EventDelivery, "training.completed");
    });
    let mut deps = in_memory_deps();
    deps.metrics = handle;
    let app = common::build_app(deps);

    // Act
    let (status, body) = common::get_text(app.router, "/metrics").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ironlog_work_items_enqueued_total"));
    assert!(body.contains(r#"family="notification""#));
    assert!(body.contains(r#"kind="user.registration.welcome""#));
    assert!(body.contains("ironlog_work_items_failed_total"));
}

#[tokio::test]
async fn test_ready_reports_store_availability() {
    let healthy = common::build_app(in_memory_deps());
    let broken = common::build_app(common::TestDeps::new(
        Arc::new(InMemoryNotificationStore::new()),
        Arc::new(FailingStore),
    ));

    let (ok_status, ok) = common::get_json(healthy.router, "/ready").await;
    let (down_status, down) = common::get_json(broken.router, "/ready").await;

    assert_eq!(ok_status, StatusCode::OK);
    assert_eq!(ok["status"], "ok");
    assert_eq!(down_status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(down["status"], "unavailable");
}
