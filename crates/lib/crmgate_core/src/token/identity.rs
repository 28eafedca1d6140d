//! Service identity sign-in against an identity provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::TokenError;
use crate::http::{ApiClient, ApiClientConfig, HttpError};

/// Identity Toolkit REST base URL.
pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Secure Token REST base URL (refresh grants).
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Outcome of a sign-in or refresh exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SignInGrant {
    pub id_token: String,
    pub refresh_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    pub local_id: Option<String>,
}

/// Exchanges service credentials or a refresh token for an access token.
#[async_trait]
pub trait CredentialAuthenticator: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInGrant, TokenError>;

    async fn refresh(&self, refresh_token: &str) -> Result<SignInGrant, TokenError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    local_id: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Identity Toolkit email/password sign-in plus Secure Token refresh grants.
#[derive(Debug, Clone)]
pub struct IdentityToolkitAuthenticator {
    sign_in_api: ApiClient,
    refresh_api: ApiClient,
    api_key: String,
}

impl IdentityToolkitAuthenticator {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self::with_endpoints(http, api_key, timeout, IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL)
    }

    /// Point both exchanges at custom base URLs.
    pub fn with_endpoints(
        http: reqwest::Client,
        api_key: impl Into<String>,
        timeout: Duration,
        sign_in_base: &str,
        refresh_base: &str,
    ) -> Self {
        let config = |base: &str| ApiClientConfig::new(base).with_timeout(timeout);
        Self {
            sign_in_api: ApiClient::new(http.clone(), config(sign_in_base)),
            refresh_api: ApiClient::new(http, config(refresh_base)),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl CredentialAuthenticator for IdentityToolkitAuthenticator {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SignInGrant, TokenError> {
        let body = json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        let resp: SignInResponse = self
            .sign_in_api
            .post_with_query("accounts:signInWithPassword", &[("key", self.api_key.as_str())], &body)
            .await
            .map_err(sign_in_error)?;

        Ok(SignInGrant {
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_in: parse_expires_in(resp.expires_in.as_deref()),
            local_id: resp.local_id,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SignInGrant, TokenError> {
        let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        let resp: RefreshResponse = self
            .refresh_api
            .post_form("token", &[("key", self.api_key.as_str())], &form)
            .await
            .map_err(|e| TokenError::Refresh(e.message().to_string()))?;

        Ok(SignInGrant {
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_in: parse_expires_in(resp.expires_in.as_deref()),
            local_id: resp.user_id,
        })
    }
}

/// `expiresIn` arrives as a decimal string; default to one hour.
fn parse_expires_in(value: Option<&str>) -> i64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(3600)
}

/// Only a 4xx answer is a rejection of the credentials; server errors and
/// transport failures mean the provider is unavailable.
fn sign_in_error(err: HttpError) -> TokenError {
    let rejected = err.status().is_some_and(|s| s.is_client_error());
    match err.provider_code() {
        Some(code) if rejected => TokenError::SignIn {
            code: code.to_string(),
            message: err.message().to_string(),
        },
        _ => TokenError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn expires_in_parses_string_seconds() {
        assert_eq!(parse_expires_in(Some("3600")), 3600);
        assert_eq!(parse_expires_in(Some(" 120 ")), 120);
        assert_eq!(parse_expires_in(Some("soon")), 3600);
        assert_eq!(parse_expires_in(None), 3600);
    }

    #[test]
    fn sign_in_error_extracts_provider_code() {
        let err = sign_in_error(HttpError::Status {
            status: StatusCode::BAD_REQUEST,
            message: "INVALID_LOGIN_CREDENTIALS".into(),
            body: None,
            endpoint: "accounts:signInWithPassword".into(),
        });
        match err {
            TokenError::SignIn { code, .. } => assert_eq!(code, "INVALID_LOGIN_CREDENTIALS"),
            other => panic!("unexpected {other:?}"),
        }

        let err = sign_in_error(HttpError::Status {
            status: StatusCode::BAD_REQUEST,
            message: "TOO_MANY_ATTEMPTS_TRY_LATER : Access disabled".into(),
            body: None,
            endpoint: "accounts:signInWithPassword".into(),
        });
        assert!(matches!(err, TokenError::SignIn { code, .. } if code == "TOO_MANY_ATTEMPTS_TRY_LATER"));
    }

    #[test]
    fn server_errors_are_unavailable_not_rejections() {
        let err = sign_in_error(HttpError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "Service Unavailable".into(),
            body: None,
            endpoint: "accounts:signInWithPassword".into(),
        });
        assert!(matches!(err, TokenError::Unavailable(_)));

        let err = sign_in_error(HttpError::Unavailable {
            message: "connection refused".into(),
            endpoint: "accounts:signInWithPassword".into(),
        });
        assert!(matches!(err, TokenError::Unavailable(_)));
    }
}
