//! # crmgate_api
//!
//! HTTP API library for crmgate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use crmgate_core::auth::AuthRepository;
use crmgate_core::authz::AbilityFactory;
use crmgate_core::upstream::ServiceApiClient;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{auth, health};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Active auth backend.
    pub auth: Arc<dyn AuthRepository>,
    /// Role → permissions.
    pub abilities: AbilityFactory,
    /// Downstream service API, authenticated with the managed service token.
    pub service_api: ServiceApiClient,
    /// PostgreSQL pool, when a database is configured.
    pub pool: Option<PgPool>,
}

/// Run embedded database migrations.
///
/// Delegates to `crmgate_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    crmgate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_VERIFY, post(auth::verify_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler));

    // Protected routes: bearer verification, then the route's permission rules.
    let protected = Router::new()
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_AUTH_USER_ID, get(auth::get_user_handler))
        .route(routes::POST_AUTH_INVITE, post(auth::invite_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_permissions,
        ))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
