//! Identity Toolkit admin calls authorized by a service account.
//!
//! The service account signs an RS256 assertion that is exchanged for an
//! OAuth access token (cached until shortly before expiry). The same key signs
//! custom tokens handed back to clients after registration.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::FirebaseEndpoints;
use crate::auth::AuthError;
use crate::http::{ApiClient, ApiClientConfig, HttpError};

const ADMIN_SCOPES: &str = "https://www.googleapis.com/auth/identitytoolkit \
                            https://www.googleapis.com/auth/firebase \
                            https://www.googleapis.com/auth/cloud-platform";

const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Renew the OAuth token this long before it expires.
const ACCESS_TOKEN_SLACK_SECS: i64 = 60;

/// Service account credentials.
#[derive(Clone)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CustomTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Value>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedAccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Account as returned by `accounts:lookup` and `accounts` (create).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAccount {
    pub local_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// JSON-encoded custom claims.
    #[serde(default)]
    pub custom_attributes: Option<String>,
    /// Epoch milliseconds as a decimal string.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login_at: Option<String>,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<ProviderAccount>,
}

/// Admin client for one Firebase project.
pub struct AdminClient {
    account: ServiceAccount,
    signing_key: EncodingKey,
    identity_api: ApiClient,
    oauth_api: ApiClient,
    access_token: Mutex<Option<CachedAccessToken>>,
}

impl AdminClient {
    pub fn new(
        http: reqwest::Client,
        account: ServiceAccount,
        endpoints: &FirebaseEndpoints,
    ) -> Result<Self, AuthError> {
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| AuthError::Config(format!("invalid Firebase private key: {e}")))?;
        Ok(Self {
            account,
            signing_key,
            identity_api: ApiClient::new(
                http.clone(),
                ApiClientConfig::new(endpoints.identity_toolkit.as_str()),
            ),
            oauth_api: ApiClient::new(http, ApiClientConfig::new(endpoints.oauth_token.as_str())),
            access_token: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }

    /// Sign a custom token for `uid`, optionally carrying developer claims.
    pub fn create_custom_token(&self, uid: &str, claims: Option<Value>) -> Result<String, AuthError> {
        let now = Utc::now();
        let payload = CustomTokenClaims {
            iss: self.account.client_email.clone(),
            sub: self.account.client_email.clone(),
            aud: CUSTOM_TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            uid: uid.to_string(),
            claims,
        };
        encode(&Header::new(Algorithm::RS256), &payload, &self.signing_key)
            .map_err(|e| AuthError::Internal(format!("custom token signing: {e}")))
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<ProviderAccount, HttpError> {
        let body = json!({
            "email": email,
            "password": password,
            "displayName": display_name,
        });
        self.call("accounts", &body).await
    }

    /// Replace the custom claims of a user.
    pub async fn set_custom_claims(&self, uid: &str, claims: &Value) -> Result<(), HttpError> {
        let body = json!({
            "localId": uid,
            "customAttributes": claims.to_string(),
        });
        self.call::<Value>("accounts:update", &body).await.map(|_| ())
    }

    /// Invalidate every refresh token issued to `uid` before now.
    pub async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), HttpError> {
        let body = json!({
            "localId": uid,
            "validSince": Utc::now().timestamp().to_string(),
        });
        self.call::<Value>("accounts:update", &body).await.map(|_| ())
    }

    pub async fn lookup_user(&self, uid: &str) -> Result<Option<ProviderAccount>, HttpError> {
        let resp: LookupResponse = self
            .call("accounts:lookup", &json!({ "localId": [uid] }))
            .await?;
        Ok(resp.users.into_iter().next())
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, HttpError> {
        let bearer = self.access_token().await?;
        let endpoint = format!("projects/{}/{method}", self.account.project_id);
        self.identity_api.post(&endpoint, body, Some(&bearer)).await
    }

    async fn access_token(&self) -> Result<String, HttpError> {
        let mut cached = self.access_token.lock().await;
        if let Some(current) = cached.as_ref()
            && current.expires_at > Utc::now() + Duration::seconds(ACCESS_TOKEN_SLACK_SECS)
        {
            return Ok(current.token.clone());
        }

        let assertion = self.sign_assertion().map_err(|e| HttpError::Unavailable {
            message: e.to_string(),
            endpoint: "oauth2 token".into(),
        })?;
        let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
        let resp: OAuthTokenResponse = self.oauth_api.post_form("", &[], &form).await?;
        debug!(expires_in = resp.expires_in, "obtained Firebase admin access token");

        let token = resp.access_token.clone();
        *cached = Some(CachedAccessToken {
            token: resp.access_token,
            expires_at: Utc::now() + Duration::seconds(resp.expires_in),
        });
        Ok(token)
    }

    fn sign_assertion(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: ADMIN_SCOPES,
            aud: self.oauth_api.base_url(),
            iat: now,
            exp: now + 3600,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| AuthError::Internal(format!("service account assertion: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use jsonwebtoken::jwk::JwkSet;

    use super::*;
    use crate::auth::firebase::test_keys::{JWKS, service_account};

    #[test]
    fn custom_token_is_signed_with_service_account_key() {
        let admin = AdminClient::new(
            reqwest::Client::new(),
            service_account(),
            &FirebaseEndpoints::default(),
        )
        .unwrap();
        let token = admin
            .create_custom_token("uid-1", Some(json!({"role": "admin"})))
            .unwrap();

        let jwks: JwkSet = serde_json::from_str(JWKS).unwrap();
        let key = DecodingKey::from_jwk(&jwks.keys[0]).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[CUSTOM_TOKEN_AUDIENCE]);
        let claims = decode::<CustomTokenClaims>(&token, &key, &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.uid, "uid-1");
        assert_eq!(claims.iss, "svc@test-project.iam.gserviceaccount.com");
        assert_eq!(claims.claims.unwrap()["role"], "admin");
    }

    #[test]
    fn malformed_private_key_is_a_config_error() {
        let mut account = service_account();
        account.private_key = "not a key".into();
        let err = AdminClient::new(reqwest::Client::new(), account, &FirebaseEndpoints::default())
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }
}
