//! Token lifecycle manager for the service identity.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{CredentialAuthenticator, SignInGrant, TokenCache, TokenError};
use crate::models::token::{SERVICE_TOKEN_KEY, ServiceToken};
use crate::store::TokenStore;

/// Tokens expiring within this window are treated as expired.
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Email/password of the service identity.
#[derive(Clone)]
pub struct ServiceCredentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl ServiceCredentials {
    /// `None` unless both fields are non-empty.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let email = email.into();
        let password = password.into();
        (!email.is_empty() && !password.is_empty()).then_some(Self { email, password })
    }
}

/// Hands out a valid service token.
///
/// Concurrent callers that all find the cache stale may each sign in; the
/// last durable write wins. Sign-in is idempotent on the provider side so no
/// lock is held across the exchange.
pub struct TokenManager {
    credentials: Option<ServiceCredentials>,
    authenticator: Arc<dyn CredentialAuthenticator>,
    store: Arc<dyn TokenStore>,
    cache: TokenCache,
    store_key: String,
    buffer_ms: i64,
}

impl TokenManager {
    pub fn new(
        credentials: Option<ServiceCredentials>,
        authenticator: Arc<dyn CredentialAuthenticator>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            credentials,
            authenticator,
            store,
            cache: TokenCache::new(),
            store_key: SERVICE_TOKEN_KEY.to_string(),
            buffer_ms: EXPIRY_BUFFER.as_millis() as i64,
        }
    }

    /// Store the durable record under a different key.
    pub fn with_store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = key.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// A token valid for at least [`EXPIRY_BUFFER`].
    pub async fn get_token(&self) -> Result<String, TokenError> {
        let credentials = self.credentials()?;

        let now_ms = Utc::now().timestamp_millis();
        if let Some(token) = self.cache.fresh_token(now_ms, self.buffer_ms).await {
            return Ok(token);
        }

        if let Some(token) = self.load_from_store().await {
            return Ok(token);
        }

        if let Some(refresh_token) = self.cache.refresh_token().await {
            match self.refresh(&refresh_token).await {
                Ok(token) => return Ok(token),
                Err(e) => warn!(error = %e, "service token refresh failed, signing in again"),
            }
        }

        self.authenticate(credentials).await
    }

    /// Drop everything cached and sign in again. Called when an upstream
    /// rejects the current token.
    pub async fn force_reauthenticate(&self) -> Result<String, TokenError> {
        let credentials = self.credentials()?;
        self.cache.clear().await;
        info!("forcing service identity re-authentication");
        self.authenticate(credentials).await
    }

    /// Acquire a token at startup. Failures are logged, never fatal.
    pub async fn warm_up(&self) {
        if !self.is_configured() {
            info!("service identity not configured, skipping token warm-up");
            return;
        }
        match self.get_token().await {
            Ok(_) => info!("service token ready"),
            Err(e) => warn!(error = %e, "service token warm-up failed"),
        }
    }

    fn credentials(&self) -> Result<&ServiceCredentials, TokenError> {
        self.credentials.as_ref().ok_or_else(|| {
            TokenError::NotConfigured("service identity email/password are not set".into())
        })
    }

    async fn load_from_store(&self) -> Option<String> {
        let record = match self.store.load(&self.store_key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "could not load service token from store");
                return None;
            }
        };

        if record.is_fresh(Utc::now(), self.buffer_ms) {
            debug!("adopted service token from store");
            self.cache.adopt(&record).await;
            return Some(record.access_token);
        }

        if !record.refresh_token.is_empty() {
            self.cache.set_refresh_token(record.refresh_token).await;
        }
        None
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, TokenError> {
        match self.authenticator.refresh(refresh_token).await {
            Ok(mut grant) => {
                if grant.refresh_token.is_empty() {
                    grant.refresh_token = refresh_token.to_string();
                }
                debug!("service token refreshed");
                Ok(self.accept(grant).await)
            }
            Err(e) => {
                self.cache.clear().await;
                Err(e)
            }
        }
    }

    async fn authenticate(&self, credentials: &ServiceCredentials) -> Result<String, TokenError> {
        let grant = self
            .authenticator
            .sign_in(&credentials.email, &credentials.password)
            .await?;
        info!(email = %credentials.email, "service identity signed in");
        Ok(self.accept(grant).await)
    }

    async fn accept(&self, grant: SignInGrant) -> String {
        let token = ServiceToken::issued(
            grant.id_token,
            grant.refresh_token,
            grant.expires_in,
            Utc::now(),
        );
        self.cache.adopt(&token).await;
        if let Err(e) = self.store.save(&self.store_key, &token).await {
            warn!(error = %e, "could not persist service token");
        }
        token.access_token
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::StoreError;
    use crate::store::memory::MemoryTokenStore;

    struct CountingAuthenticator {
        sign_ins: AtomicU32,
        refreshes: AtomicU32,
        expires_in: i64,
        fail_refresh: AtomicBool,
    }

    impl CountingAuthenticator {
        fn new(expires_in: i64) -> Arc<Self> {
            Arc::new(Self {
                sign_ins: AtomicU32::new(0),
                refreshes: AtomicU32::new(0),
                expires_in,
                fail_refresh: AtomicBool::new(false),
            })
        }

        fn sign_ins(&self) -> u32 {
            self.sign_ins.load(Ordering::SeqCst)
        }

        fn refreshes(&self) -> u32 {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialAuthenticator for CountingAuthenticator {
        async fn sign_in(&self, email: &str, _password: &str) -> Result<SignInGrant, TokenError> {
            let n = self.sign_ins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SignInGrant {
                id_token: format!("signin-{n}"),
                refresh_token: format!("refresh-{n}"),
                expires_in: self.expires_in,
                local_id: Some(email.to_string()),
            })
        }

        async fn refresh(&self, refresh_token: &str) -> Result<SignInGrant, TokenError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_refresh.load(Ordering::SeqCst) {
                return Err(TokenError::Refresh("TOKEN_EXPIRED".into()));
            }
            Ok(SignInGrant {
                id_token: format!("refreshed-{n}-from-{refresh_token}"),
                refresh_token: String::new(),
                expires_in: self.expires_in,
                local_id: None,
            })
        }
    }

    struct FailingStore;

    #[async_trait]
    impl TokenStore for FailingStore {
        async fn load(&self, _key: &str) -> Result<Option<ServiceToken>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        async fn save(&self, _key: &str, _token: &ServiceToken) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    fn credentials() -> Option<ServiceCredentials> {
        ServiceCredentials::new("svc@leadtech.com", "pw")
    }

    fn manager(
        auth: &Arc<CountingAuthenticator>,
        store: &Arc<MemoryTokenStore>,
    ) -> TokenManager {
        TokenManager::new(credentials(), auth.clone(), store.clone())
    }

    #[tokio::test]
    async fn unconfigured_identity_fails_fast() {
        let auth = CountingAuthenticator::new(3600);
        let manager = TokenManager::new(
            ServiceCredentials::new("svc@leadtech.com", ""),
            auth.clone(),
            Arc::new(MemoryTokenStore::new()),
        );
        assert!(!manager.is_configured());
        assert!(matches!(
            manager.get_token().await,
            Err(TokenError::NotConfigured(_))
        ));
        assert!(matches!(
            manager.force_reauthenticate().await,
            Err(TokenError::NotConfigured(_))
        ));
        assert_eq!(auth.sign_ins(), 0);
    }

    #[tokio::test]
    async fn two_calls_sign_in_once_and_persist() {
        let auth = CountingAuthenticator::new(3600);
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&auth, &store);

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();
        assert_eq!(first, "signin-1");
        assert_eq!(first, second);
        assert_eq!(auth.sign_ins(), 1);

        let stored = store.load(SERVICE_TOKEN_KEY).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "signin-1");
        assert_eq!(stored.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn fresh_durable_record_is_adopted_without_network() {
        let auth = CountingAuthenticator::new(3600);
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(
                SERVICE_TOKEN_KEY,
                &ServiceToken::issued("shared".into(), "shared-r".into(), 3600, Utc::now()),
            )
            .await
            .unwrap();
        let manager = manager(&auth, &store);

        assert_eq!(manager.get_token().await.unwrap(), "shared");
        assert_eq!(auth.sign_ins() + auth.refreshes(), 0);
        assert_eq!(
            manager.cache().snapshot().await.refresh_token.as_deref(),
            Some("shared-r")
        );
    }

    #[tokio::test]
    async fn expired_durable_record_is_refreshed_with_its_refresh_token() {
        let auth = CountingAuthenticator::new(3600);
        let store = Arc::new(MemoryTokenStore::new());
        let stale = ServiceToken::issued("old".into(), "old-r".into(), 60, Utc::now());
        store.save(SERVICE_TOKEN_KEY, &stale).await.unwrap();
        let manager = manager(&auth, &store);

        let token = manager.get_token().await.unwrap();
        assert_eq!(token, "refreshed-1-from-old-r");
        assert_eq!(auth.refreshes(), 1);
        assert_eq!(auth.sign_ins(), 0);

        let stored = store.load(SERVICE_TOKEN_KEY).await.unwrap().unwrap();
        assert_eq!(stored.access_token, token);
        assert_eq!(stored.refresh_token, "old-r");
        assert!(stored.expires_at_ms > stale.expires_at_ms);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_sign_in() {
        let auth = CountingAuthenticator::new(3600);
        auth.fail_refresh.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(
                SERVICE_TOKEN_KEY,
                &ServiceToken::issued("old".into(), "dead-r".into(), 0, Utc::now()),
            )
            .await
            .unwrap();
        let manager = manager(&auth, &store);

        assert_eq!(manager.get_token().await.unwrap(), "signin-1");
        assert_eq!(auth.refreshes(), 1);
        assert_eq!(auth.sign_ins(), 1);
        assert_eq!(
            manager.cache().snapshot().await.refresh_token.as_deref(),
            Some("refresh-1")
        );
    }

    #[tokio::test]
    async fn token_inside_buffer_is_replaced_with_later_expiry() {
        // Tokens that only live 60s are always inside the 5 minute buffer.
        let auth = CountingAuthenticator::new(60);
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&auth, &store);

        manager.get_token().await.unwrap();
        let before = manager.cache().snapshot().await.expires_at_ms;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let token = manager.get_token().await.unwrap();
        assert!(token.starts_with("refreshed-1"));
        assert!(manager.cache().snapshot().await.expires_at_ms > before);
    }

    #[tokio::test]
    async fn force_reauthenticate_always_signs_in() {
        let auth = CountingAuthenticator::new(3600);
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&auth, &store);

        manager.get_token().await.unwrap();
        let forced = manager.force_reauthenticate().await.unwrap();
        assert_eq!(forced, "signin-2");
        assert_eq!(manager.get_token().await.unwrap(), "signin-2");
        assert_eq!(auth.sign_ins(), 2);
        assert_eq!(auth.refreshes(), 0);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let auth = CountingAuthenticator::new(3600);
        let manager = TokenManager::new(credentials(), auth.clone(), Arc::new(FailingStore));

        assert_eq!(manager.get_token().await.unwrap(), "signin-1");
        assert_eq!(manager.get_token().await.unwrap(), "signin-1");
        assert_eq!(auth.sign_ins(), 1);
    }

    #[tokio::test]
    async fn warm_up_acquires_token_when_configured() {
        let auth = CountingAuthenticator::new(3600);
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager(&auth, &store);
        manager.warm_up().await;
        assert_eq!(auth.sign_ins(), 1);

        let unconfigured = TokenManager::new(None, auth.clone(), store.clone());
        unconfigured.warm_up().await;
        assert_eq!(auth.sign_ins(), 1);
    }
}
