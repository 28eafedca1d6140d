//! Remote auth API backend.
//!
//! Forwards every call to an external auth service. Status mapping:
//! 409 → conflict, 401 → unauthorized, 404 → `None` on lookups, 5xx and
//! network failures → unavailable, anything else → repository failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{AuthError, AuthRepository};
use crate::http::{ApiClient, HttpError};
use crate::models::auth::{
    AuthResult, AuthUser, Claims, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    id: String,
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl From<RemoteUser> for AuthUser {
    fn from(user: RemoteUser) -> Self {
        AuthUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role.as_deref().and_then(Role::parse),
            created_at: parse_timestamp(user.created_at.as_deref()),
            updated_at: parse_timestamp(user.updated_at.as_deref()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAuthResponse {
    user: RemoteUser,
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

impl From<RemoteAuthResponse> for AuthResult {
    fn from(resp: RemoteAuthResponse) -> Self {
        AuthResult {
            user: resp.user.into(),
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_in: resp.expires_in,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteVerifyResponse {
    valid: bool,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    claims: Option<Claims>,
    #[serde(default)]
    expires_at: Option<String>,
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Auth backend that forwards to an external auth API.
#[derive(Debug, Clone)]
pub struct RemoteAuthRepository {
    api: ApiClient,
}

impl RemoteAuthRepository {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn register_at(
        &self,
        endpoint: &str,
        request: &RegisterRequest,
        role: Option<Role>,
    ) -> Result<AuthResult, AuthError> {
        let mut body = json!({
            "email": request.email,
            "password": request.password,
            "firstName": request.first_name,
            "lastName": request.last_name,
        });
        if let Some(role) = role {
            body["role"] = json!(role);
        }
        let resp: RemoteAuthResponse = self
            .api
            .post(endpoint, &body, None)
            .await
            .map_err(|e| match e.status() {
                Some(StatusCode::CONFLICT) => AuthError::Conflict("Email already registered".into()),
                _ => classify(e),
            })?;
        Ok(resp.into())
    }
}

/// Map upstream failures onto the auth error taxonomy.
fn classify(err: HttpError) -> AuthError {
    match err.status() {
        Some(StatusCode::CONFLICT) => AuthError::Conflict(err.message().to_string()),
        Some(StatusCode::UNAUTHORIZED) => AuthError::Unauthorized(err.message().to_string()),
        _ => err.into(),
    }
}

#[async_trait]
impl AuthRepository for RemoteAuthRepository {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResult, AuthError> {
        self.register_at("/auth/register", request, None).await
    }

    async fn register_with_role(
        &self,
        request: &RegisterRequest,
        role: Role,
    ) -> Result<AuthResult, AuthError> {
        self.register_at("/auth/invite", request, Some(role)).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResult, AuthError> {
        let body = json!({ "email": request.email, "password": request.password });
        let resp: RemoteAuthResponse = self
            .api
            .post("/auth/login", &body, None)
            .await
            .map_err(|e| match e.status() {
                Some(StatusCode::UNAUTHORIZED) => {
                    AuthError::Unauthorized("Invalid email or password".into())
                }
                _ => classify(e),
            })?;
        Ok(resp.into())
    }

    async fn verify_token(&self, token: &str) -> Result<TokenVerificationResult, AuthError> {
        let result = self
            .api
            .post::<RemoteVerifyResponse, _>("/auth/verify", &json!({ "token": token }), None)
            .await;
        let resp = match result {
            Ok(resp) => resp,
            Err(e) if e.status() == Some(StatusCode::UNAUTHORIZED) => {
                debug!("remote auth API rejected token");
                return Ok(TokenVerificationResult::invalid());
            }
            Err(e) => return Err(classify(e)),
        };
        if !resp.valid {
            return Ok(TokenVerificationResult::invalid());
        }
        Ok(TokenVerificationResult {
            valid: true,
            user_id: resp.user_id,
            email: resp.email,
            claims: resp.claims,
            expires_at: parse_timestamp(resp.expires_at.as_deref()),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResult, AuthError> {
        self.api
            .post("/auth/refresh", &json!({ "refreshToken": refresh_token }), None)
            .await
            .map_err(classify)
    }

    async fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        match self
            .api
            .post_discard("/auth/revoke", &json!({ "token": token }), None)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "remote token revocation failed");
                Ok(false)
            }
        }
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<AuthUser>, AuthError> {
        let endpoint = format!("/users/{user_id}");
        match self.api.get::<RemoteUser>(&endpoint, None).await {
            Ok(user) => Ok(Some(user.into())),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_user_maps_role_and_dates() {
        let user: RemoteUser = serde_json::from_value(json!({
            "id": "u1",
            "email": "a@leadtech.com",
            "firstName": "Ana",
            "lastName": "Lima",
            "role": "customer_service",
            "createdAt": "2025-01-02T03:04:05Z",
            "updatedAt": "not a date"
        }))
        .unwrap();
        let user = AuthUser::from(user);
        assert_eq!(user.role, Some(Role::CustomerService));
        assert!(user.created_at.is_some());
        assert!(user.updated_at.is_none());
    }

    #[test]
    fn unknown_remote_role_is_absent() {
        let user: RemoteUser =
            serde_json::from_value(json!({"id": "u1", "email": "a@b.c", "role": "root"})).unwrap();
        assert_eq!(AuthUser::from(user).role, None);
    }
}
