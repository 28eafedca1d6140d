//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub auth_backend: &'static str,
    pub service_identity_configured: bool,
    /// `None` when running without a database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_connected: Option<bool>,
}

/// `GET /health` — backend in use and dependency reachability.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_connected = match &state.pool {
        Some(pool) => Some(sqlx::query("SELECT 1").execute(pool).await.is_ok()),
        None => None,
    };

    Json(HealthResponse {
        status: "ok",
        version: crmgate_core::version(),
        auth_backend: state.auth.name(),
        service_identity_configured: state.service_api.tokens().is_configured(),
        db_connected,
    })
}
