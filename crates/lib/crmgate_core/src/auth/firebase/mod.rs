//! Identity-provider (Firebase Authentication) backend.
//!
//! Registration, revocation and lookups go through the Identity Toolkit admin
//! REST API; ID tokens are verified locally against the published keys.
//! Login and refresh happen client-side against the provider and are not
//! supported here.

pub mod admin;
pub mod keys;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use self::admin::{AdminClient, ProviderAccount, ServiceAccount};
use self::keys::{IdTokenError, IdTokenVerifier};
use super::{AuthError, AuthRepository};
use crate::http::HttpError;
use crate::models::auth::{
    AuthResult, AuthUser, LoginRequest, RegisterRequest, Role, TokenRefreshResult,
    TokenVerificationResult,
};

/// Lifetime reported for custom tokens.
const CUSTOM_TOKEN_EXPIRES_IN: i64 = 3600;

/// REST endpoints used by the backend.
#[derive(Debug, Clone)]
pub struct FirebaseEndpoints {
    pub identity_toolkit: String,
    pub oauth_token: String,
    pub jwks: String,
}

impl Default for FirebaseEndpoints {
    fn default() -> Self {
        Self {
            identity_toolkit: "https://identitytoolkit.googleapis.com/v1".into(),
            oauth_token: "https://oauth2.googleapis.com/token".into(),
            jwks: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
                .into(),
        }
    }
}

/// Auth backend backed by Firebase Authentication.
pub struct FirebaseAuthRepository {
    admin: AdminClient,
    verifier: IdTokenVerifier,
}

impl FirebaseAuthRepository {
    pub fn new(
        http: reqwest::Client,
        account: ServiceAccount,
        endpoints: &FirebaseEndpoints,
    ) -> Result<Self, AuthError> {
        if account.project_id.is_empty() || account.client_email.is_empty() {
            return Err(AuthError::Config(
                "FIREBASE_PROJECT_ID and FIREBASE_CLIENT_EMAIL are required".into(),
            ));
        }
        let verifier = IdTokenVerifier::new(http.clone(), &endpoints.jwks, &account.project_id);
        let admin = AdminClient::new(http, account, endpoints)?;
        info!(project = admin.project_id(), "Firebase auth backend ready");
        Ok(Self { admin, verifier })
    }

    async fn create(
        &self,
        request: &RegisterRequest,
        role: Option<Role>,
    ) -> Result<AuthResult, AuthError> {
        let display_name = format!(
            "{} {}",
            request.first_name,
            request.last_name.as_deref().unwrap_or_default()
        );
        let account = self
            .admin
            .create_user(&request.email, &request.password, display_name.trim())
            .await
            .map_err(provider_error)?;

        let claims = role.map(|role| json!({ "role": role }));
        if let Some(claims) = &claims {
            self.admin
                .set_custom_claims(&account.local_id, claims)
                .await
                .map_err(provider_error)?;
        }

        let access_token = self.admin.create_custom_token(&account.local_id, claims)?;
        let mut user = account_to_user(account);
        if role.is_some() {
            user.role = role;
        }
        Ok(AuthResult {
            user,
            access_token,
            refresh_token: String::new(),
            expires_in: CUSTOM_TOKEN_EXPIRES_IN,
        })
    }
}

/// Map provider error codes onto the auth error taxonomy.
fn provider_error(err: HttpError) -> AuthError {
    match err.provider_code() {
        Some("EMAIL_EXISTS" | "DUPLICATE_EMAIL") => {
            AuthError::Conflict("Email already registered".into())
        }
        Some("USER_NOT_FOUND") => AuthError::NotFound("User not found".into()),
        Some("INVALID_EMAIL" | "WEAK_PASSWORD" | "MISSING_PASSWORD") => {
            AuthError::Validation(err.message().to_string())
        }
        Some("INVALID_ID_TOKEN" | "TOKEN_EXPIRED") => {
            AuthError::Unauthorized(err.message().to_string())
        }
        _ => err.into(),
    }
}

fn parse_millis(value: Option<&str>) -> Option<DateTime<chrono::Utc>> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
}

fn account_to_user(account: ProviderAccount) -> AuthUser {
    let role = account
        .custom_attributes
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|claims| claims.get("role").and_then(Value::as_str).and_then(Role::parse));
    let created_at = parse_millis(account.created_at.as_deref());
    let updated_at = parse_millis(account.last_login_at.as_deref()).or(created_at);

    let mut user = AuthUser::from_display_name(
        account.local_id,
        account.email.unwrap_or_default(),
        account.display_name.as_deref(),
    );
    user.role = role;
    user.created_at = created_at;
    user.updated_at = updated_at;
    user
}

#[async_trait]
impl AuthRepository for FirebaseAuthRepository {
    fn name(&self) -> &'static str {
        "firebase"
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResult, AuthError> {
        self.create(request, None).await
    }

    async fn register_with_role(
        &self,
        request: &RegisterRequest,
        role: Role,
    ) -> Result<AuthResult, AuthError> {
        self.create(request, Some(role)).await
    }

    async fn login(&self, _request: &LoginRequest) -> Result<AuthResult, AuthError> {
        Err(AuthError::Unsupported(
            "Direct login not supported. Use client-side Firebase Auth SDK.".into(),
        ))
    }

    async fn verify_token(&self, token: &str) -> Result<TokenVerificationResult, AuthError> {
        let claims = match self.verifier.verify(token).await {
            Ok(claims) => claims,
            Err(IdTokenError::Invalid(reason)) => {
                debug!(%reason, "ID token rejected");
                return Ok(TokenVerificationResult::invalid());
            }
            Err(IdTokenError::KeysUnavailable(e)) => return Err(e.into()),
        };

        let string_claim = |key: &str| claims.get(key).and_then(Value::as_str).map(str::to_string);
        let user_id = string_claim("user_id").or_else(|| string_claim("sub"));
        let email = string_claim("email");
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| DateTime::from_timestamp(exp, 0));
        Ok(TokenVerificationResult {
            valid: true,
            user_id,
            email,
            expires_at,
            claims: Some(claims),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenRefreshResult, AuthError> {
        Err(AuthError::Unsupported(
            "Token refresh should be handled client-side with Firebase SDK".into(),
        ))
    }

    /// Accepts an ID token or a bare uid.
    async fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        let uid = if token.split('.').count() == 3 {
            match self.verifier.verify(token).await {
                Ok(claims) => match claims.get("sub").and_then(Value::as_str) {
                    Some(sub) => sub.to_string(),
                    None => return Ok(false),
                },
                Err(e) => {
                    warn!(error = %e, "cannot revoke: ID token not verifiable");
                    return Ok(false);
                }
            }
        } else {
            token.to_string()
        };

        match self.admin.revoke_refresh_tokens(&uid).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Firebase refresh token revocation failed");
                Ok(false)
            }
        }
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<AuthUser>, AuthError> {
        match self.admin.lookup_user(user_id).await {
            Ok(account) => Ok(account.map(account_to_user)),
            Err(e) if e.provider_code() == Some("USER_NOT_FOUND") => Ok(None),
            Err(e) => Err(provider_error(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    use super::admin::ServiceAccount;

    pub const PROJECT_ID: &str = "test-project";
    pub const PRIVATE_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/service_account_key.pem"
    ));
    pub const JWKS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/jwks.json"));

    pub fn service_account() -> ServiceAccount {
        ServiceAccount {
            project_id: PROJECT_ID.into(),
            client_email: "svc@test-project.iam.gserviceaccount.com".into(),
            private_key: PRIVATE_KEY.into(),
        }
    }

    /// Sign `claims` the way the provider signs ID tokens.
    pub fn sign_id_token(claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key-1".into());
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Form, Json, Router};
    use jsonwebtoken::jwk::JwkSet;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
    use reqwest::StatusCode;

    use super::*;
    use crate::test_support::spawn_stub;

    fn status(message: &str) -> HttpError {
        HttpError::Status {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            body: None,
            endpoint: "projects/p/accounts".into(),
        }
    }

    #[test]
    fn provider_codes_map_to_taxonomy() {
        assert!(matches!(provider_error(status("EMAIL_EXISTS")), AuthError::Conflict(_)));
        assert!(matches!(provider_error(status("USER_NOT_FOUND")), AuthError::NotFound(_)));
        assert!(matches!(
            provider_error(status("WEAK_PASSWORD : Password should be at least 6 characters")),
            AuthError::Validation(_)
        ));
        assert!(matches!(provider_error(status("TOKEN_EXPIRED")), AuthError::Unauthorized(_)));
        assert!(matches!(
            provider_error(status("QUOTA_EXCEEDED")),
            AuthError::Repository { status: Some(400), .. }
        ));
    }

    #[test]
    fn account_maps_display_name_role_and_times() {
        let account: ProviderAccount = serde_json::from_value(json!({
            "localId": "uid-1",
            "email": "a@leadtech.com",
            "displayName": "Ana Maria Lima",
            "customAttributes": "{\"role\":\"customer_service\"}",
            "createdAt": "1700000000000",
        }))
        .unwrap();
        let user = account_to_user(account);
        assert_eq!(user.first_name, "Ana");
        assert_eq!(user.last_name, "Maria Lima");
        assert_eq!(user.role, Some(Role::CustomerService));
        assert_eq!(user.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(user.updated_at, user.created_at);
    }

    #[test]
    fn missing_project_is_a_config_error() {
        let mut account = test_keys::service_account();
        account.project_id.clear();
        let err = FirebaseAuthRepository::new(
            reqwest::Client::new(),
            account,
            &FirebaseEndpoints::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AuthError::Config(_)));
    }

    /// What the stubbed provider received.
    #[derive(Default)]
    struct AdminStub {
        grants: Mutex<Vec<HashMap<String, String>>>,
        updates: Mutex<Vec<Value>>,
    }

    type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

    fn provider_failure(code: &str) -> (StatusCode, Json<Value>) {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": { "message": code } })))
    }

    fn check_bearer(headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer admin-token") => Ok(()),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "message": "UNAUTHENTICATED" } })),
            )),
        }
    }

    async fn oauth_token(
        State(stub): State<Arc<AdminStub>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<Value> {
        stub.grants.lock().unwrap().push(form);
        Json(json!({ "access_token": "admin-token", "expires_in": 3600, "token_type": "Bearer" }))
    }

    async fn create_account(headers: HeaderMap, Json(body): Json<Value>) -> Reply {
        check_bearer(&headers)?;
        if body["email"] == "taken@leadtech.com" {
            return Err(provider_failure("EMAIL_EXISTS"));
        }
        Ok(Json(json!({
            "localId": "uid-new",
            "email": body["email"],
            "displayName": body["displayName"],
        })))
    }

    async fn update_account(
        State(stub): State<Arc<AdminStub>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Reply {
        check_bearer(&headers)?;
        if body["localId"] == "broken" {
            return Err(provider_failure("USER_NOT_FOUND"));
        }
        stub.updates.lock().unwrap().push(body.clone());
        Ok(Json(json!({ "localId": body["localId"] })))
    }

    async fn lookup_account(headers: HeaderMap, Json(body): Json<Value>) -> Reply {
        check_bearer(&headers)?;
        match body["localId"][0].as_str() {
            Some("uid-1") => Ok(Json(json!({
                "users": [{
                    "localId": "uid-1",
                    "email": "a@leadtech.com",
                    "displayName": "Ana Lima",
                    "customAttributes": "{\"role\":\"admin\"}",
                    "createdAt": "1700000000000",
                }]
            }))),
            Some("missing") => Err(provider_failure("USER_NOT_FOUND")),
            _ => Ok(Json(json!({}))),
        }
    }

    async fn stubbed_backend() -> (FirebaseAuthRepository, Arc<AdminStub>, String) {
        let stub = Arc::new(AdminStub::default());
        let router = Router::new()
            .route("/oauth/token", post(oauth_token))
            .route("/v1/projects/test-project/accounts", post(create_account))
            .route("/v1/projects/test-project/accounts:update", post(update_account))
            .route("/v1/projects/test-project/accounts:lookup", post(lookup_account))
            .route("/jwks", get(|| async { test_keys::JWKS }))
            .with_state(stub.clone());
        let base = spawn_stub(router).await;
        let endpoints = FirebaseEndpoints {
            identity_toolkit: format!("{base}/v1"),
            oauth_token: format!("{base}/oauth/token"),
            jwks: format!("{base}/jwks"),
        };
        let repo = FirebaseAuthRepository::new(
            reqwest::Client::new(),
            test_keys::service_account(),
            &endpoints,
        )
        .unwrap();
        (repo, stub, base)
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "secret-pw".into(),
            first_name: "Jane".into(),
            last_name: Some("Doe".into()),
        }
    }

    #[tokio::test]
    async fn registration_creates_account_and_role_claims() {
        let (repo, stub, base) = stubbed_backend().await;

        let plain = repo.register(&register_request("jane@leadtech.com")).await.unwrap();
        assert_eq!(plain.user.id, "uid-new");
        assert_eq!(plain.user.first_name, "Jane");
        assert_eq!(plain.user.last_name, "Doe");
        assert_eq!(plain.user.role, None);
        assert_eq!(plain.access_token.split('.').count(), 3);
        assert!(stub.updates.lock().unwrap().is_empty());

        let invited = repo
            .register_with_role(&register_request("ana@leadtech.com"), Role::CustomerService)
            .await
            .unwrap();
        assert_eq!(invited.user.role, Some(Role::CustomerService));
        let updates = stub.updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["localId"], "uid-new");
        let claims: Value =
            serde_json::from_str(updates[0]["customAttributes"].as_str().unwrap()).unwrap();
        assert_eq!(claims["role"], "customer_service");

        let taken = repo.register(&register_request("taken@leadtech.com")).await;
        assert!(matches!(taken, Err(AuthError::Conflict(_))));

        // One assertion exchange serves every admin call.
        let grants = stub.grants.lock().unwrap().clone();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0]["grant_type"], "urn:ietf:params:oauth:grant-type:jwt-bearer");

        let jwks: JwkSet = serde_json::from_str(test_keys::JWKS).unwrap();
        let key = DecodingKey::from_jwk(&jwks.keys[0]).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[format!("{base}/oauth/token")]);
        let assertion = decode::<Value>(&grants[0]["assertion"], &key, &validation)
            .unwrap()
            .claims;
        assert_eq!(assertion["iss"], "svc@test-project.iam.gserviceaccount.com");
        assert!(assertion["scope"].as_str().unwrap().contains("identitytoolkit"));
    }

    #[tokio::test]
    async fn revocation_and_lookup_go_through_admin_api() {
        let (repo, stub, _) = stubbed_backend().await;

        assert!(repo.revoke_token("uid-1").await.unwrap());
        let now = chrono::Utc::now().timestamp();
        let id_token = test_keys::sign_id_token(&json!({
            "iss": format!("https://securetoken.google.com/{}", test_keys::PROJECT_ID),
            "aud": test_keys::PROJECT_ID,
            "sub": "uid-2",
            "user_id": "uid-2",
            "iat": now,
            "exp": now + 600,
        }));
        assert!(repo.revoke_token(&id_token).await.unwrap());
        assert!(!repo.revoke_token("broken").await.unwrap());
        assert!(!repo.revoke_token("not.a.token").await.unwrap());

        let updates = stub.updates.lock().unwrap().clone();
        let revoked: Vec<&Value> = updates.iter().map(|u| &u["localId"]).collect();
        assert_eq!(revoked, [&json!("uid-1"), &json!("uid-2")]);
        assert!(updates.iter().all(|u| u["validSince"].is_string()));

        let user = repo.get_user_by_id("uid-1").await.unwrap().unwrap();
        assert_eq!(user.email, "a@leadtech.com");
        assert_eq!(user.role, Some(Role::Admin));
        assert!(repo.get_user_by_id("missing").await.unwrap().is_none());
        assert!(repo.get_user_by_id("ghost").await.unwrap().is_none());

        assert_eq!(stub.grants.lock().unwrap().len(), 1);
    }
}
