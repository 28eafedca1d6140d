//! Authentication and authorization middleware.

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use crmgate_core::authz::authorize;
use crmgate_core::models::auth::Role;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::AppError;
use crate::routes::requirements_for;

/// Verified caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<Role>,
    /// The bearer token the caller presented.
    pub token: String,
}

/// Extracts `Authorization: Bearer <token>`, verifies it with the active
/// auth backend and injects [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?
        .to_string();

    let verification = state.auth.verify_token(&token).await?;
    let Some(user_id) = verification.user_id.clone().filter(|_| verification.valid) else {
        return Err(AppError::Unauthorized("Invalid or expired token".into()));
    };

    request.extensions_mut().insert(AuthenticatedUser {
        user_id,
        email: verification.email.clone(),
        role: verification.role(),
        token,
    });

    Ok(next.run(request).await)
}

/// Checks the caller's permissions against the matched route's requirements.
/// Must run after [`require_auth`].
pub async fn require_permissions(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Without a matched route the requirements are unknown; deny.
    let Some(path) = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
    else {
        warn!(uri = %request.uri(), "no matched route for permission check");
        return Err(AppError::Forbidden("Access denied".into()));
    };
    let requirements = requirements_for(&path);
    if requirements.is_empty() {
        return Ok(next.run(request).await);
    }

    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;

    let permissions = state.abilities.create_for_role(user.role);
    if let Err(e) = authorize(&permissions, requirements) {
        warn!(user_id = %user.user_id, role = ?user.role, route = %path, "permission denied");
        return Err(e.into());
    }
    debug!(user_id = %user.user_id, route = %path, "permission granted");

    Ok(next.run(request).await)
}
