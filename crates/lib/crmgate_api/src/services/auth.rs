//! Authentication service: calls the active backend and turns its errors into
//! the messages callers are allowed to see.

use crmgate_core::auth::{AuthError, AuthRepository};
use crmgate_core::models::auth::{
    AuthResult, AuthUser, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
    pub revoked: bool,
}

fn check_credentials(email: &str, password: &str) -> AppResult<()> {
    if !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".into()));
    }
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".into()));
    }
    Ok(())
}

fn conflict_as_registered(e: AuthError) -> AppError {
    match e {
        AuthError::Conflict(_) => AppError::Conflict("Email already registered".into()),
        other => other.into(),
    }
}

pub async fn register(repo: &dyn AuthRepository, request: &RegisterRequest) -> AppResult<AuthResult> {
    check_credentials(&request.email, &request.password)?;
    let result = repo.register(request).await.map_err(conflict_as_registered)?;
    info!(user_id = %result.user.id, backend = repo.name(), "user registered");
    Ok(result)
}

pub async fn invite(
    repo: &dyn AuthRepository,
    request: &RegisterRequest,
    role: Role,
    invited_by: &str,
) -> AppResult<AuthResult> {
    check_credentials(&request.email, &request.password)?;
    let result = repo
        .register_with_role(request, role)
        .await
        .map_err(conflict_as_registered)?;
    info!(user_id = %result.user.id, %role, %invited_by, "user invited");
    Ok(result)
}

pub async fn login(repo: &dyn AuthRepository, request: &LoginRequest) -> AppResult<AuthResult> {
    check_credentials(&request.email, &request.password)?;
    match repo.login(request).await {
        Ok(result) => {
            info!(user_id = %result.user.id, "login successful");
            Ok(result)
        }
        Err(AuthError::Unauthorized(_)) => Err(AppError::Unauthorized("Invalid credentials".into())),
        Err(e) => Err(e.into()),
    }
}

pub async fn verify(repo: &dyn AuthRepository, token: &str) -> AppResult<TokenVerificationResult> {
    Ok(repo.verify_token(token).await?)
}

/// Every failure reads as an invalid refresh token; the cause is logged.
pub async fn refresh(repo: &dyn AuthRepository, refresh_token: &str) -> AppResult<TokenRefreshResult> {
    repo.refresh_token(refresh_token).await.map_err(|e| {
        warn!(error = %e, "token refresh failed");
        AppError::Unauthorized("Invalid refresh token".into())
    })
}

pub async fn logout(repo: &dyn AuthRepository, token: &str, user_id: &str) -> AppResult<LogoutResponse> {
    let revoked = repo.revoke_token(token).await?;
    if revoked {
        info!(%user_id, "tokens revoked on logout");
    } else {
        warn!(%user_id, "logout did not revoke any token");
    }
    Ok(LogoutResponse {
        message: "Logged out successfully".into(),
        revoked,
    })
}

pub async fn get_user(repo: &dyn AuthRepository, user_id: &str) -> AppResult<AuthUser> {
    repo.get_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}
