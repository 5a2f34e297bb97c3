//! Ironlog API server entry point.

use std::sync::Arc;

use ironlog_api::config::{DeliveryMode, Settings};
use ironlog_api::error::AppError;
use ironlog_api::pipeline::{Pipeline, PipelineDeps, build_sender};
use ironlog_api::routes;
use ironlog_api::state::AppState;
use ironlog_core::clock::SystemClock;
use ironlog_core::job::BackgroundTrigger;
use ironlog_core::repository::{EventStore, NotificationStore};
use ironlog_jobs::queue::{NoopTrigger, job_queue};
use ironlog_store::pg_event_store::PgEventStore;
use ironlog_store::pg_notification_store::PgNotificationStore;
use ironlog_store::schema::MIGRATOR;
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Ironlog API server");

    let settings = Settings::from_env()?;
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Metrics(e.to_string()))?;

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let notifications: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool.clone()));
    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool));

    let (trigger, queue) = match settings.delivery_mode {
        DeliveryMode::Async => {
            let (trigger, queue) = job_queue(settings.job_queue_capacity);
            (Arc::new(trigger) as Arc<dyn BackgroundTrigger>, Some(queue))
        }
        DeliveryMode::Disabled => {
            tracing::warn!("background delivery disabled");
            (Arc::new(NoopTrigger) as Arc<dyn BackgroundTrigger>, None)
        }
    };

    let pipeline = Pipeline::build(
        &settings,
        PipelineDeps {
            notifications: Arc::clone(&notifications),
            events: Arc::clone(&events),
            trigger,
            sender: build_sender(&settings)?,
            clock: Arc::new(SystemClock),
        },
    )?;

    // Background workers share one shutdown token.
    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();
    if let Some(queue) = queue {
        let runner = pipeline.job_runner(&settings);
        let token = cancel.clone();
        workers.spawn(async move { runner.run(queue, token).await });

        let sweeper = Arc::clone(&pipeline.sweeper);
        let token = cancel.clone();
        workers.spawn(async move { sweeper.run(token).await });

        let dispatcher = Arc::clone(&pipeline.dispatcher);
        let token = cancel.clone();
        workers.spawn(async move { dispatcher.run(token).await });
    }

    let app_state = AppState::new(
        notifications,
        events,
        &pipeline,
        metrics,
        settings.max_attempts,
    );
    let app = routes::router(app_state);

    // Start server.
    let addr = settings.bind_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    while let Some(finished) = workers.join_next().await {
        if let Err(e) = finished {
            tracing::error!(error = %e, "background worker panicked");
        }
    }
    tracing::info!("Ironlog API server stopped");

    Ok(())
}
