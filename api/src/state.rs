use std::sync::Arc;

use sqlx::PgPool;

use crate::nudge::OutboxStore;
use crate::nudge::detector::Detector;

/// Shared application state. Every field is cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub detector: Arc<Detector>,
    pub outbox: Arc<dyn OutboxStore>,
    /// Operator token for the admin surface. None means the gate is open
    /// (local development).
    pub admin_token: Option<String>,
}
