use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::nudge::detector::Detector;
use crate::nudge::worker::OutboxWorker;
use crate::nudge::{ClaimStore, HistorySource, OutboxStore, PreferenceSource, SessionSource, TaskSource};
use crate::stores::postgres::{
    PgClaimStore, PgHistorySource, PgOutboxStore, PgPreferenceSource, PgSessionSource,
    PgTaskSource,
};

mod auth;
mod error;
mod nudge;
mod routes;
mod state;
mod stores;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mentora Nudge API",
        version = "0.1.0",
        description = "Idempotent reminder/nudge detection and delivery engine for Mentora sessions, tasks and contacts."
    ),
    paths(
        routes::health::health_check,
        routes::nudges::run_pass,
        routes::outbox::list_outbox,
        routes::outbox::get_entry,
        routes::outbox::retry_entry,
    ),
    components(schemas(
        HealthResponse,
        nudge::PassSummary,
        routes::outbox::RetryResponse,
        mentora_core::error::ApiError,
        mentora_core::outbox::OutboxEntry,
        mentora_core::outbox::OutboxStatus,
        mentora_core::outbox::PaginatedResponse<mentora_core::outbox::OutboxEntry>,
        mentora_core::nudge::UserNudgePreferences,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Outbox entries currently awaiting delivery (None when the DB is
    /// unreachable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_outbox: Option<i64>,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mentora_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let sessions: Arc<dyn SessionSource> = Arc::new(PgSessionSource::new(pool.clone()));
    let tasks: Arc<dyn TaskSource> = Arc::new(PgTaskSource::new(pool.clone()));
    let history: Arc<dyn HistorySource> = Arc::new(PgHistorySource::new(pool.clone()));
    let prefs: Arc<dyn PreferenceSource> = Arc::new(PgPreferenceSource::new(pool.clone()));
    let claims: Arc<dyn ClaimStore> = Arc::new(PgClaimStore::new(pool.clone()));
    let outbox: Arc<dyn OutboxStore> = Arc::new(PgOutboxStore::new(pool.clone()));

    let detector = Arc::new(Detector::new(
        sessions,
        tasks,
        history,
        prefs,
        claims,
        outbox.clone(),
    ));
    let worker = Arc::new(OutboxWorker::new(outbox.clone(), nudge::sender::sender_from_env()));

    spawn_detection_ticks(detector.clone());
    spawn_outbox_sweeps(worker);

    let app_state = state::AppState {
        db: pool,
        detector,
        outbox,
        admin_token: auth::admin_token_from_env(),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::nudges::router())
        .merge(routes::outbox::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Mentora Nudge API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn env_seconds(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Periodic detection ticks. The tick is just a schedule: each pass is a
/// bounded, self-contained scan, and overlapping passes are safe because
/// the idempotency claim is atomic.
fn spawn_detection_ticks(detector: Arc<Detector>) {
    let secs = env_seconds("NUDGE_TICK_SECONDS", 60);
    if secs == 0 {
        tracing::info!("NUDGE_TICK_SECONDS=0; periodic detection disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
        loop {
            interval.tick().await;
            detector.run_pass(chrono::Utc::now()).await;
        }
    });
}

/// Periodic outbox sweeps: lease due entries and attempt delivery.
fn spawn_outbox_sweeps(worker: Arc<OutboxWorker>) {
    let secs = env_seconds("OUTBOX_SWEEP_SECONDS", 5);
    if secs == 0 {
        tracing::info!("OUTBOX_SWEEP_SECONDS=0; outbox sweeps disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
        loop {
            interval.tick().await;
            worker.sweep(chrono::Utc::now()).await;
        }
    });
}
