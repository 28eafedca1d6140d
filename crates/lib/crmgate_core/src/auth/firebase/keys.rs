//! ID token verification against the provider's published signing keys.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::http::{ApiClient, ApiClientConfig, HttpError};
use crate::models::auth::Claims;

/// Refetch the key set after this long.
const KEY_CACHE_TTL_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum IdTokenError {
    /// Expired, malformed, wrong audience or bad signature.
    #[error("invalid ID token: {0}")]
    Invalid(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(#[from] HttpError),
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Verifies RS256 ID tokens issued for one project.
pub struct IdTokenVerifier {
    jwks_api: ApiClient,
    project_id: String,
    keys: RwLock<Option<CachedKeys>>,
}

impl IdTokenVerifier {
    pub fn new(http: reqwest::Client, jwks_url: &str, project_id: impl Into<String>) -> Self {
        Self {
            jwks_api: ApiClient::new(http, ApiClientConfig::new(jwks_url)),
            project_id: project_id.into(),
            keys: RwLock::new(None),
        }
    }

    /// Verify signature, expiry, audience and issuer; return the claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, IdTokenError> {
        let header = decode_header(token).map_err(|e| IdTokenError::Invalid(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(IdTokenError::Invalid(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdTokenError::Invalid("missing kid".into()))?;
        let jwk = self.find_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| IdTokenError::Invalid(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(|e| IdTokenError::Invalid(e.to_string()))?
            .claims;
        match claims.get("sub").and_then(|v| v.as_str()) {
            Some(sub) if !sub.is_empty() => Ok(claims),
            _ => Err(IdTokenError::Invalid("missing subject".into())),
        }
    }

    /// Key for `kid`, refetching the set once when it is stale or lacks the key.
    async fn find_key(&self, kid: &str) -> Result<Jwk, IdTokenError> {
        {
            let cached = self.keys.read().await;
            if let Some(keys) = cached.as_ref()
                && Utc::now() - keys.fetched_at < Duration::minutes(KEY_CACHE_TTL_MINUTES)
                && let Some(jwk) = keys.set.find(kid)
            {
                return Ok(jwk.clone());
            }
        }

        let set: JwkSet = self.jwks_api.get("", None).await?;
        debug!(keys = set.keys.len(), "fetched ID token signing keys");
        let jwk = set.find(kid).cloned();
        *self.keys.write().await = Some(CachedKeys {
            set,
            fetched_at: Utc::now(),
        });
        jwk.ok_or_else(|| IdTokenError::Invalid(format!("unknown key id {kid}")))
    }
}
