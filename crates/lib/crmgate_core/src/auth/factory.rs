//! Backend selection.
//!
//! [`AuthRepositoryRegistry`] maps each [`AuthProviderKind`] to a constructor.
//! Constructors check their own prerequisites, so a misconfigured backend
//! fails at startup rather than on the first request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::AuthError;
use super::AuthRepository;
use super::baas::BaasAuthRepository;
use super::document::DocumentAuthRepository;
use super::firebase::{FirebaseAuthRepository, FirebaseEndpoints};
use super::jwt::{TokenIssuer, resolve_jwt_secret};
use super::remote::RemoteAuthRepository;
use crate::config::CoreConfig;
use crate::store::UserStore;

/// Backend tag from `AUTH_PROVIDER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AuthProviderKind {
    /// External auth REST API.
    #[default]
    Api,
    /// Identity provider via its admin REST API.
    Firebase,
    /// Users in the document store, self-issued JWTs.
    Firestore,
    /// BaaS `/auth` passthrough.
    Baas,
}

impl AuthProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProviderKind::Api => "api",
            AuthProviderKind::Firebase => "firebase",
            AuthProviderKind::Firestore => "firestore",
            AuthProviderKind::Baas => "baas",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "api" => Some(AuthProviderKind::Api),
            "firebase" => Some(AuthProviderKind::Firebase),
            "firestore" => Some(AuthProviderKind::Firestore),
            "baas" => Some(AuthProviderKind::Baas),
            _ => None,
        }
    }

    /// Unset or unknown values select [`AuthProviderKind::Api`].
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value {
            None => Self::default(),
            Some(raw) => Self::parse(raw).unwrap_or_else(|| {
                warn!(value = raw, "unknown AUTH_PROVIDER, using api");
                Self::default()
            }),
        }
    }
}

impl fmt::Display for AuthProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a backend constructor may draw on.
#[derive(Clone)]
pub struct AuthBackendDeps<'a> {
    pub config: &'a CoreConfig,
    pub http: reqwest::Client,
    pub users: Option<Arc<dyn UserStore>>,
    pub firebase_endpoints: FirebaseEndpoints,
}

impl<'a> AuthBackendDeps<'a> {
    pub fn new(config: &'a CoreConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            users: None,
            firebase_endpoints: FirebaseEndpoints::default(),
        }
    }

    pub fn with_user_store(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_firebase_endpoints(mut self, endpoints: FirebaseEndpoints) -> Self {
        self.firebase_endpoints = endpoints;
        self
    }
}

pub type BackendConstructor =
    fn(&AuthBackendDeps<'_>) -> Result<Arc<dyn AuthRepository>, AuthError>;

/// Tag → constructor table.
pub struct AuthRepositoryRegistry {
    constructors: HashMap<AuthProviderKind, BackendConstructor>,
}

impl AuthRepositoryRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the four built-in backends.
    pub fn with_builtin_backends() -> Self {
        Self::empty()
            .register(AuthProviderKind::Api, build_remote)
            .register(AuthProviderKind::Firebase, build_firebase)
            .register(AuthProviderKind::Firestore, build_document)
            .register(AuthProviderKind::Baas, build_baas)
    }

    pub fn register(mut self, kind: AuthProviderKind, constructor: BackendConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    pub fn build(
        &self,
        kind: AuthProviderKind,
        deps: &AuthBackendDeps<'_>,
    ) -> Result<Arc<dyn AuthRepository>, AuthError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| AuthError::Config(format!("no auth backend registered for '{kind}'")))?;
        let repo = constructor(deps)?;
        info!(provider = %kind, backend = repo.name(), "auth backend selected");
        Ok(repo)
    }
}

impl Default for AuthRepositoryRegistry {
    fn default() -> Self {
        Self::with_builtin_backends()
    }
}

fn build_remote(deps: &AuthBackendDeps<'_>) -> Result<Arc<dyn AuthRepository>, AuthError> {
    let api = deps.config.auth_api.api_client(deps.http.clone());
    Ok(Arc::new(RemoteAuthRepository::new(api)))
}

fn build_baas(deps: &AuthBackendDeps<'_>) -> Result<Arc<dyn AuthRepository>, AuthError> {
    let api = deps.config.baas_api.api_client(deps.http.clone());
    Ok(Arc::new(BaasAuthRepository::new(api)))
}

fn build_firebase(deps: &AuthBackendDeps<'_>) -> Result<Arc<dyn AuthRepository>, AuthError> {
    let firebase = &deps.config.firebase;
    if firebase.private_key.is_empty() {
        return Err(AuthError::Config(
            "FIREBASE_PRIVATE_KEY is required for the firebase provider".into(),
        ));
    }
    let repo = FirebaseAuthRepository::new(
        deps.http.clone(),
        firebase.service_account(),
        &deps.firebase_endpoints,
    )?;
    Ok(Arc::new(repo))
}

fn build_document(deps: &AuthBackendDeps<'_>) -> Result<Arc<dyn AuthRepository>, AuthError> {
    let users = deps.users.clone().ok_or_else(|| {
        AuthError::Config("the firestore provider needs a user store".into())
    })?;
    let jwt = &deps.config.jwt;
    let secret = resolve_jwt_secret(jwt.secret.as_deref());
    let issuer = TokenIssuer::new(secret.as_bytes(), jwt.access_ttl_secs, jwt.refresh_ttl_secs);
    Ok(Arc::new(DocumentAuthRepository::new(
        users,
        issuer,
        deps.config.allowed_email_domains.clone(),
        deps.config.seed_account.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;

    fn config(pairs: &[(&str, &str)]) -> CoreConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoreConfig::from_lookup(move |key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    #[test]
    fn parse_accepts_known_tags_case_insensitively() {
        assert_eq!(AuthProviderKind::parse("FIRESTORE"), Some(AuthProviderKind::Firestore));
        assert_eq!(AuthProviderKind::parse(" baas "), Some(AuthProviderKind::Baas));
        assert_eq!(AuthProviderKind::parse("ldap"), None);
        assert_eq!(AuthProviderKind::parse_lenient(Some("ldap")), AuthProviderKind::Api);
        assert_eq!(AuthProviderKind::parse_lenient(None), AuthProviderKind::Api);
    }

    #[test]
    fn builds_each_http_backend() {
        let cfg = config(&[]);
        let deps = AuthBackendDeps::new(&cfg, reqwest::Client::new());
        let registry = AuthRepositoryRegistry::with_builtin_backends();
        assert_eq!(registry.build(AuthProviderKind::Api, &deps).unwrap().name(), "api");
        assert_eq!(registry.build(AuthProviderKind::Baas, &deps).unwrap().name(), "baas");
    }

    #[test]
    fn firestore_requires_a_user_store() {
        let cfg = config(&[("JWT_SECRET", "test-secret")]);
        let registry = AuthRepositoryRegistry::default();

        let deps = AuthBackendDeps::new(&cfg, reqwest::Client::new());
        assert!(matches!(
            registry.build(AuthProviderKind::Firestore, &deps),
            Err(AuthError::Config(_))
        ));

        let deps = deps.with_user_store(Arc::new(MemoryUserStore::new()));
        assert_eq!(
            registry.build(AuthProviderKind::Firestore, &deps).unwrap().name(),
            "firestore"
        );
    }

    #[test]
    fn firebase_without_service_account_fails_fast() {
        let cfg = config(&[("FIREBASE_PROJECT_ID", "p")]);
        let deps = AuthBackendDeps::new(&cfg, reqwest::Client::new());
        assert!(matches!(
            AuthRepositoryRegistry::default().build(AuthProviderKind::Firebase, &deps),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn unregistered_kind_is_a_config_error() {
        let cfg = config(&[]);
        let deps = AuthBackendDeps::new(&cfg, reqwest::Client::new());
        assert!(matches!(
            AuthRepositoryRegistry::empty().build(AuthProviderKind::Api, &deps),
            Err(AuthError::Config(_))
        ));
    }
}
