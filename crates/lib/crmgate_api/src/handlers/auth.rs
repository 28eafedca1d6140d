//! Authentication request handlers.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use crmgate_core::models::auth::{
    AuthResult, AuthUser, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::services::auth::{self, LogoutResponse};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    #[serde(flatten)]
    pub user: RegisterRequest,
    pub role: Role,
}

/// `POST /auth/register` — create a new user account.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<AuthResult>> {
    Ok(Json(auth::register(state.auth.as_ref(), &body).await?))
}

/// `POST /auth/login` — authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResult>> {
    Ok(Json(auth::login(state.auth.as_ref(), &body).await?))
}

/// `POST /auth/verify` — report whether a token is valid.
pub async fn verify_handler(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> AppResult<Json<TokenVerificationResult>> {
    Ok(Json(auth::verify(state.auth.as_ref(), &body.token).await?))
}

/// `POST /auth/refresh` — exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenRefreshResult>> {
    Ok(Json(auth::refresh(state.auth.as_ref(), &body.refresh_token).await?))
}

/// `POST /auth/logout` — revoke the given refresh token, or the bearer token
/// when none is sent.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Option<Json<LogoutRequest>>,
) -> AppResult<Json<LogoutResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let token = body.refresh_token.as_deref().unwrap_or(&user.token);
    Ok(Json(auth::logout(state.auth.as_ref(), token, &user.user_id).await?))
}

/// `GET /auth/user/{id}` — fetch a user profile.
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AuthUser>> {
    Ok(Json(auth::get_user(state.auth.as_ref(), &id).await?))
}

/// `POST /auth/invite` — create a user with a given role.
pub async fn invite_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<InviteRequest>,
) -> AppResult<Json<AuthResult>> {
    Ok(Json(
        auth::invite(state.auth.as_ref(), &body.user, body.role, &user.user_id).await?,
    ))
}
