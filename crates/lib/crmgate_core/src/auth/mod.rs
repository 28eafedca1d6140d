//! User authentication.
//!
//! [`AuthRepository`] is the contract every backend implements; the backend is
//! picked once at startup by [`factory::AuthRepositoryRegistry`] from the
//! `AUTH_PROVIDER` setting.

pub mod baas;
pub mod document;
pub mod factory;
pub mod firebase;
pub mod jwt;
pub mod password;
pub mod remote;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::http::HttpError;
use crate::models::auth::{
    AuthResult, AuthUser, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult,
};
use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Auth service unavailable: {message}")]
    Unavailable {
        message: String,
        /// Upstream error detail, for logs only.
        original: Option<String>,
    },

    #[error("Auth repository error: {message}")]
    Repository {
        status: Option<u16>,
        message: String,
        /// Upstream error detail, for logs only.
        original: Option<String>,
    },

    #[error("Token error: {0}")]
    Token(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HttpError> for AuthError {
    /// Generic classification of upstream failures. Backends map the status
    /// codes that mean something for the operation at hand before falling
    /// back to this.
    fn from(err: HttpError) -> Self {
        let original = match &err {
            HttpError::Status { body: Some(body), .. } => Some(body.to_string()),
            other => Some(other.to_string()),
        };
        match err {
            HttpError::Status { status, message, .. } if status.is_server_error() => {
                AuthError::Unavailable { message, original }
            }
            HttpError::Status { status, message, .. } => AuthError::Repository {
                status: Some(status.as_u16()),
                message,
                original,
            },
            HttpError::Unavailable { message, .. } => AuthError::Unavailable { message, original },
            HttpError::Decode { message, .. } => AuthError::Repository {
                status: None,
                message,
                original,
            },
        }
    }
}

impl AuthError {
    /// Upstream status for repository failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AuthError::Repository { status, .. } => status.and_then(|s| StatusCode::from_u16(s).ok()),
            _ => None,
        }
    }
}

/// Authentication contract shared by every backend.
#[async_trait]
pub trait AuthRepository: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResult, AuthError>;

    /// Register a user with an explicit role. Backends without role support
    /// fail with [`AuthError::Unsupported`].
    async fn register_with_role(
        &self,
        request: &RegisterRequest,
        role: Role,
    ) -> Result<AuthResult, AuthError>;

    async fn login(&self, request: &LoginRequest) -> Result<AuthResult, AuthError>;

    /// Invalid or expired tokens yield `valid: false`, not an error.
    async fn verify_token(&self, token: &str) -> Result<TokenVerificationResult, AuthError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResult, AuthError>;

    /// `false` does not distinguish "nothing to revoke" from a failed revoke.
    async fn revoke_token(&self, token: &str) -> Result<bool, AuthError>;

    /// Unknown users yield `None`.
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<AuthUser>, AuthError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn server_errors_classify_as_unavailable() {
        let err: AuthError = HttpError::Status {
            status: StatusCode::BAD_GATEWAY,
            message: "down".into(),
            body: None,
            endpoint: "/auth/login".into(),
        }
        .into();
        assert!(matches!(err, AuthError::Unavailable { .. }));
    }

    #[test]
    fn client_errors_keep_status_and_original_body() {
        let err: AuthError = HttpError::Status {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "bad".into(),
            body: Some(json!({"message": "bad", "trace": "x"})),
            endpoint: "/auth/register".into(),
        }
        .into();
        assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
        match err {
            AuthError::Repository { message, original, .. } => {
                assert_eq!(message, "bad");
                assert!(original.unwrap().contains("trace"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
