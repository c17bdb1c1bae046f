//! Health and operational endpoints.

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;

use super::error::envelope;
use crate::auth::{BasicAuth, BasicAuthConfig, HasBasicAuth};
use crate::db::Database;
use crate::identity::MokaIdentityCache;

#[derive(Clone)]
pub struct HealthState {
    pub db: Database,
    pub env: String,
    pub basic_auth: BasicAuthConfig,
    pub cache: Option<Arc<MokaIdentityCache>>,
}

impl HasBasicAuth for HealthState {
    fn basic_auth(&self) -> &BasicAuthConfig {
        &self.basic_auth
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/debug/vars", get(debug_vars))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    env: String,
    version: &'static str,
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    envelope(HealthResponse {
        status: "ok",
        env: state.env,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct DebugVars {
    version: &'static str,
    db_connections: u32,
    db_idle_connections: usize,
    cache_enabled: bool,
    cached_identities: u64,
}

async fn debug_vars(State(state): State<HealthState>, _auth: BasicAuth) -> impl IntoResponse {
    let pool = state.db.pool();
    envelope(DebugVars {
        version: env!("CARGO_PKG_VERSION"),
        db_connections: pool.size(),
        db_idle_connections: pool.num_idle(),
        cache_enabled: state.cache.is_some(),
        cached_identities: state.cache.as_ref().map_or(0, |c| c.entry_count()),
    })
}
