//! BaaS passthrough backend.
//!
//! Login is delegated to the BaaS `/auth` endpoint, which answers with an
//! identity-provider token. The token payload is inspected locally (expiry
//! only); its signature is not checked here. Registration and refresh are
//! client-side concerns and are not supported.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{AuthError, AuthRepository};
use crate::http::ApiClient;
use crate::models::auth::{
    AuthResult, AuthUser, Claims, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult, split_display_name,
};

#[derive(Deserialize)]
struct BaasAuthResponse {
    token: String,
}

#[derive(Deserialize)]
struct BaasUser {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl From<BaasUser> for AuthUser {
    fn from(user: BaasUser) -> Self {
        let mut out = AuthUser::from_display_name(user.id, user.email, user.name.as_deref());
        let now = Utc::now();
        out.created_at = Some(parse_timestamp(user.created_at.as_deref()).unwrap_or(now));
        out.updated_at = Some(parse_timestamp(user.updated_at.as_deref()).unwrap_or(now));
        out
    }
}

/// Decode the payload segment of a compact JWT without verifying it.
pub fn decode_payload(token: &str) -> Result<Claims, AuthError> {
    let invalid = || AuthError::Unauthorized("Invalid token format".into());
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|_| invalid())?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        _ => Err(invalid()),
    }
}

fn claim_str<'a>(claims: &'a Claims, key: &str) -> Option<&'a str> {
    claims.get(key).and_then(Value::as_str).filter(|v| !v.is_empty())
}

/// Auth backend that signs in through the BaaS API.
#[derive(Debug, Clone)]
pub struct BaasAuthRepository {
    api: ApiClient,
}

impl BaasAuthRepository {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AuthRepository for BaasAuthRepository {
    fn name(&self) -> &'static str {
        "baas"
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<AuthResult, AuthError> {
        Err(AuthError::Unsupported(
            "Registration not supported via BAAS API. Contact admin.".into(),
        ))
    }

    async fn register_with_role(
        &self,
        _request: &RegisterRequest,
        _role: Role,
    ) -> Result<AuthResult, AuthError> {
        Err(AuthError::Unsupported(
            "Registration not supported via BAAS API. Contact admin.".into(),
        ))
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResult, AuthError> {
        let body = json!({ "username": request.email, "password": request.password });
        let resp: BaasAuthResponse = self
            .api
            .post("/auth", &body, None)
            .await
            .map_err(|e| match e.status() {
                Some(StatusCode::UNAUTHORIZED) => {
                    AuthError::Unauthorized("Invalid email or password".into())
                }
                _ => e.into(),
            })?;

        let claims = decode_payload(&resp.token)?;
        let id = claim_str(&claims, "user_id")
            .or_else(|| claim_str(&claims, "sub"))
            .unwrap_or_default()
            .to_string();
        let email = claim_str(&claims, "email").unwrap_or(&request.email).to_string();
        let (first_name, last_name) = split_display_name(claim_str(&claims, "name").unwrap_or_default());
        let expires_in = claims
            .get("exp")
            .and_then(Value::as_i64)
            .map_or(3600, |exp| exp - Utc::now().timestamp());

        let now = Utc::now();
        info!(user_id = %id, "BaaS login successful");
        Ok(AuthResult {
            user: AuthUser {
                id,
                email,
                first_name,
                last_name,
                role: Role::from_claims(&claims),
                created_at: Some(now),
                updated_at: Some(now),
            },
            access_token: resp.token.clone(),
            // The provider flow has no separate refresh token.
            refresh_token: resp.token,
            expires_in,
        })
    }

    async fn verify_token(&self, token: &str) -> Result<TokenVerificationResult, AuthError> {
        let Ok(claims) = decode_payload(token) else {
            return Ok(TokenVerificationResult::invalid());
        };
        let exp = claims.get("exp").and_then(Value::as_i64);
        if exp.is_some_and(|exp| exp < Utc::now().timestamp()) {
            return Ok(TokenVerificationResult::invalid());
        }
        Ok(TokenVerificationResult {
            valid: true,
            user_id: claim_str(&claims, "user_id")
                .or_else(|| claim_str(&claims, "sub"))
                .map(str::to_string),
            email: claim_str(&claims, "email").map(str::to_string),
            expires_at: exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
            claims: Some(claims),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenRefreshResult, AuthError> {
        Err(AuthError::Unsupported(
            "Token refresh should be handled on client side with Firebase SDK".into(),
        ))
    }

    /// Client-side logout; nothing to revoke here.
    async fn revoke_token(&self, _token: &str) -> Result<bool, AuthError> {
        Ok(true)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<AuthUser>, AuthError> {
        let endpoint = format!("/users/{user_id}");
        match self.api.get::<BaasUser>(&endpoint, None).await {
            Ok(user) => Ok(Some(user.into())),
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
