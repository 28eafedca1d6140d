//! Environment-sourced configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `AUTH_PROVIDER` | `api` (`api`, `firebase`, `firestore`, `baas`) |
//! | `AUTH_API_URL` / `AUTH_API_TIMEOUT` (ms) / `AUTH_API_KEY` / `AUTH_API_RETRY_ATTEMPTS` | `http://localhost:3001` / `10000` / empty / `3` |
//! | `BAAS_API_URL` / `BAAS_API_TIMEOUT` (ms) | `http://localhost:3002/api` / `10000` |
//! | `SERVICE_API_URL` / `SERVICE_API_TIMEOUT` (ms) | `http://localhost:3002/api` / `10000` |
//! | `FIREBASE_PROJECT_ID` / `FIREBASE_CLIENT_EMAIL` / `FIREBASE_PRIVATE_KEY` | unset |
//! | `FIREBASE_WEB_API_KEY` / `FIREBASE_AUTH_EMAIL` / `FIREBASE_AUTH_PASSWORD` | empty |
//! | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file |
//! | `JWT_ACCESS_EXPIRES_IN` / `JWT_REFRESH_EXPIRES_IN` (s) | `3600` / `604800` |
//! | `DEFAULT_USER_EMAIL` / `DEFAULT_USER_PASSWORD` | unset |
//! | `AUTH_ALLOWED_EMAIL_DOMAINS` | `leadtech` |
//! | `AUTH_MISSING_ROLE_POLICY` | `deny` |
//! | `DATABASE_URL` | unset (in-process store) |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::auth::document::{DomainAllowlist, SeedAccount};
use crate::auth::factory::AuthProviderKind;
use crate::auth::firebase::admin::ServiceAccount;
use crate::auth::jwt::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};
use crate::authz::MissingRolePolicy;
use crate::http::{ApiClient, ApiClientConfig, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::token::ServiceCredentials;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// One upstream HTTP service.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `X-API-Key` when non-empty.
    pub api_key: String,
    pub retry_attempts: u32,
}

impl UpstreamConfig {
    pub fn api_client(&self, http: reqwest::Client) -> ApiClient {
        ApiClient::new(
            http,
            ApiClientConfig::new(self.base_url.as_str())
                .with_timeout(self.timeout)
                .with_retry(self.retry_attempts, DEFAULT_RETRY_DELAY)
                .with_header("X-API-Key", &self.api_key),
        )
    }
}

/// Service account for the identity-provider backend.
#[derive(Clone, Default)]
pub struct FirebaseConfig {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
}

impl fmt::Debug for FirebaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseConfig")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &(!self.private_key.is_empty()))
            .finish()
    }
}

impl FirebaseConfig {
    pub fn service_account(&self) -> ServiceAccount {
        ServiceAccount {
            project_id: self.project_id.clone(),
            client_email: self.client_email.clone(),
            private_key: self.private_key.clone(),
        }
    }
}

/// Sign-in details of the service identity used by the token manager.
#[derive(Clone, Default)]
pub struct ServiceIdentityConfig {
    pub web_api_key: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for ServiceIdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentityConfig")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl ServiceIdentityConfig {
    pub fn credentials(&self) -> Option<ServiceCredentials> {
        ServiceCredentials::new(self.email.as_str(), self.password.as_str())
    }
}

/// Self-issued token settings.
#[derive(Clone)]
pub struct JwtConfig {
    /// `JWT_SECRET`, else `AUTH_SECRET`.
    pub secret: Option<String>,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .finish_non_exhaustive()
    }
}

/// Everything the core needs at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub auth_provider: AuthProviderKind,
    pub auth_api: UpstreamConfig,
    pub baas_api: UpstreamConfig,
    pub service_api: UpstreamConfig,
    pub firebase: FirebaseConfig,
    pub service_identity: ServiceIdentityConfig,
    pub jwt: JwtConfig,
    pub seed_account: Option<SeedAccount>,
    pub allowed_email_domains: DomainAllowlist,
    pub missing_role_policy: MissingRolePolicy,
    pub database_url: Option<String>,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Secrets are taken verbatim; tags, addresses and numbers are trimmed.
        let secret = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let secret_or = |key: &str| secret(key).unwrap_or_default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let upstream = |url_key: &str, timeout_key: &str, default_url: &str| UpstreamConfig {
            base_url: get_or(url_key, default_url),
            timeout: Duration::from_millis(parse_positive_or(
                timeout_key,
                get(timeout_key),
                DEFAULT_TIMEOUT_MS,
            )),
            api_key: String::new(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        };

        let mut auth_api = upstream("AUTH_API_URL", "AUTH_API_TIMEOUT", "http://localhost:3001");
        auth_api.api_key = secret_or("AUTH_API_KEY");
        auth_api.retry_attempts = parse_or(
            "AUTH_API_RETRY_ATTEMPTS",
            get("AUTH_API_RETRY_ATTEMPTS"),
            DEFAULT_RETRY_ATTEMPTS,
        );

        let missing_role_policy = match get("AUTH_MISSING_ROLE_POLICY") {
            None => MissingRolePolicy::default(),
            Some(raw) => MissingRolePolicy::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown AUTH_MISSING_ROLE_POLICY, using deny");
                MissingRolePolicy::Deny
            }),
        };

        let seed_account = match (get("DEFAULT_USER_EMAIL"), secret("DEFAULT_USER_PASSWORD")) {
            (Some(email), Some(password)) => Some(SeedAccount { email, password }),
            _ => None,
        };

        Self {
            auth_provider: AuthProviderKind::parse_lenient(get("AUTH_PROVIDER").as_deref()),
            auth_api,
            baas_api: upstream("BAAS_API_URL", "BAAS_API_TIMEOUT", "http://localhost:3002/api"),
            service_api: upstream(
                "SERVICE_API_URL",
                "SERVICE_API_TIMEOUT",
                "http://localhost:3002/api",
            ),
            firebase: FirebaseConfig {
                project_id: get_or("FIREBASE_PROJECT_ID", ""),
                client_email: get_or("FIREBASE_CLIENT_EMAIL", ""),
                // Keys pasted into env files carry literal `\n` sequences.
                private_key: secret_or("FIREBASE_PRIVATE_KEY").replace("\\n", "\n"),
            },
            service_identity: ServiceIdentityConfig {
                web_api_key: secret_or("FIREBASE_WEB_API_KEY"),
                email: get_or("FIREBASE_AUTH_EMAIL", ""),
                password: secret_or("FIREBASE_AUTH_PASSWORD"),
            },
            jwt: JwtConfig {
                secret: secret("JWT_SECRET").or_else(|| secret("AUTH_SECRET")),
                access_ttl_secs: parse_positive_or(
                    "JWT_ACCESS_EXPIRES_IN",
                    get("JWT_ACCESS_EXPIRES_IN"),
                    DEFAULT_ACCESS_TTL_SECS,
                ),
                refresh_ttl_secs: parse_positive_or(
                    "JWT_REFRESH_EXPIRES_IN",
                    get("JWT_REFRESH_EXPIRES_IN"),
                    DEFAULT_REFRESH_TTL_SECS,
                ),
            },
            seed_account,
            allowed_email_domains: DomainAllowlist::parse(&get_or(
                "AUTH_ALLOWED_EMAIL_DOMAINS",
                "leadtech",
            )),
            missing_role_policy,
            database_url: get("DATABASE_URL"),
        }
    }
}

/// Parse `raw`, falling back to `default` (with a warning) when invalid.
fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    match raw {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, %value, %default, "invalid numeric setting, using default");
            default
        }),
    }
}

/// Like [`parse_or`], but zero and negative values also fall back.
fn parse_positive_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + fmt::Display + Copy + PartialOrd + Default,
{
    let value = parse_or(key, raw, default);
    if value > T::default() {
        value
    } else {
        warn!(key, %value, %default, "setting must be positive, using default");
        default
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> CoreConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoreConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.auth_provider, AuthProviderKind::Api);
        assert_eq!(cfg.auth_api.base_url, "http://localhost:3001");
        assert_eq!(cfg.auth_api.timeout, Duration::from_secs(10));
        assert_eq!(cfg.auth_api.retry_attempts, 3);
        assert_eq!(cfg.baas_api.base_url, "http://localhost:3002/api");
        assert_eq!(cfg.jwt.access_ttl_secs, 3600);
        assert_eq!(cfg.jwt.refresh_ttl_secs, 604_800);
        assert!(cfg.jwt.secret.is_none());
        assert!(cfg.seed_account.is_none());
        assert!(cfg.service_identity.credentials().is_none());
        assert_eq!(cfg.missing_role_policy, MissingRolePolicy::Deny);
        assert!(cfg.allowed_email_domains.allows("a@leadtech.com"));
        assert!(!cfg.allowed_email_domains.allows("a@example.com"));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn values_are_read_and_invalid_numbers_fall_back() {
        let cfg = config(&[
            ("AUTH_PROVIDER", "firestore"),
            ("AUTH_API_TIMEOUT", "2500"),
            ("AUTH_API_RETRY_ATTEMPTS", "many"),
            ("JWT_SECRET", ""),
            ("AUTH_SECRET", "s3cret"),
            ("JWT_ACCESS_EXPIRES_IN", "900"),
            ("DEFAULT_USER_EMAIL", "admin@leadtech.com"),
            ("DEFAULT_USER_PASSWORD", "changeme123"),
            ("FIREBASE_PRIVATE_KEY", "-----BEGIN-----\\nabc\\n-----END-----"),
            ("FIREBASE_AUTH_EMAIL", "svc@leadtech.com"),
            ("FIREBASE_AUTH_PASSWORD", "pw"),
            ("AUTH_MISSING_ROLE_POLICY", "admin"),
        ]);
        assert_eq!(cfg.auth_provider, AuthProviderKind::Firestore);
        assert_eq!(cfg.auth_api.timeout, Duration::from_millis(2500));
        assert_eq!(cfg.auth_api.retry_attempts, 3);
        assert_eq!(cfg.jwt.secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.jwt.access_ttl_secs, 900);
        assert_eq!(cfg.seed_account.unwrap().email, "admin@leadtech.com");
        assert_eq!(cfg.firebase.private_key, "-----BEGIN-----\nabc\n-----END-----");
        assert!(cfg.service_identity.credentials().is_some());
        assert_eq!(cfg.missing_role_policy, MissingRolePolicy::Admin);
    }

    #[test]
    fn unknown_provider_defaults_to_api() {
        assert_eq!(config(&[("AUTH_PROVIDER", "ldap")]).auth_provider, AuthProviderKind::Api);
    }

    #[test]
    fn secrets_keep_surrounding_whitespace() {
        let cfg = config(&[
            ("FIREBASE_AUTH_EMAIL", "  svc@leadtech.com "),
            ("FIREBASE_AUTH_PASSWORD", " pass phrase "),
            ("JWT_SECRET", "secret "),
            ("AUTH_PROVIDER", " firebase "),
        ]);
        assert_eq!(cfg.service_identity.email, "svc@leadtech.com");
        assert_eq!(cfg.service_identity.password, " pass phrase ");
        assert_eq!(cfg.jwt.secret.as_deref(), Some("secret "));
        assert_eq!(cfg.auth_provider, AuthProviderKind::Firebase);
    }

    #[test]
    fn non_positive_durations_fall_back() {
        let cfg = config(&[
            ("JWT_ACCESS_EXPIRES_IN", "-60"),
            ("JWT_REFRESH_EXPIRES_IN", "0"),
            ("AUTH_API_TIMEOUT", "0"),
        ]);
        assert_eq!(cfg.jwt.access_ttl_secs, DEFAULT_ACCESS_TTL_SECS);
        assert_eq!(cfg.jwt.refresh_ttl_secs, DEFAULT_REFRESH_TTL_SECS);
        assert_eq!(cfg.auth_api.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }
}
