//! In-memory mirror of the current service token.

use tokio::sync::RwLock;

use crate::models::token::ServiceToken;

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedToken {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unix epoch milliseconds; `0` when nothing is cached.
    pub expires_at_ms: i64,
}

/// Shared token cache. Owned by one [`TokenManager`](super::TokenManager),
/// which is the only writer.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: RwLock<CachedToken>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached access token, if it outlives `now_ms` by more than `buffer_ms`.
    pub async fn fresh_token(&self, now_ms: i64, buffer_ms: i64) -> Option<String> {
        let cached = self.inner.read().await;
        match &cached.access_token {
            Some(token) if cached.expires_at_ms > now_ms + buffer_ms => Some(token.clone()),
            _ => None,
        }
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.refresh_token.clone()
    }

    /// Replace the cache contents with `token`.
    pub async fn adopt(&self, token: &ServiceToken) {
        let mut cached = self.inner.write().await;
        cached.access_token = Some(token.access_token.clone());
        cached.refresh_token = (!token.refresh_token.is_empty()).then(|| token.refresh_token.clone());
        cached.expires_at_ms = token.expires_at_ms;
    }

    /// Keep only a refresh token, e.g. one recovered from an expired record.
    pub async fn set_refresh_token(&self, refresh_token: String) {
        let mut cached = self.inner.write().await;
        cached.access_token = None;
        cached.refresh_token = Some(refresh_token);
        cached.expires_at_ms = 0;
    }

    pub async fn clear(&self) {
        *self.inner.write().await = CachedToken::default();
    }

    pub async fn snapshot(&self) -> CachedToken {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn fresh_token_honours_buffer() {
        let cache = TokenCache::new();
        let now = Utc::now();
        cache
            .adopt(&ServiceToken::issued("a".into(), "r".into(), 600, now))
            .await;

        let now_ms = now.timestamp_millis();
        assert_eq!(cache.fresh_token(now_ms, 300_000).await.as_deref(), Some("a"));
        assert_eq!(cache.fresh_token(now_ms, 600_000).await, None);
        assert_eq!(cache.refresh_token().await.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let cache = TokenCache::new();
        cache
            .adopt(&ServiceToken::issued("a".into(), "r".into(), 600, Utc::now()))
            .await;
        cache.clear().await;
        assert_eq!(cache.snapshot().await, CachedToken::default());
    }

    #[tokio::test]
    async fn set_refresh_token_drops_access_token() {
        let cache = TokenCache::new();
        cache
            .adopt(&ServiceToken::issued("a".into(), "r".into(), 600, Utc::now()))
            .await;
        cache.set_refresh_token("r2".into()).await;
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.access_token, None);
        assert_eq!(snapshot.refresh_token.as_deref(), Some("r2"));
        assert_eq!(snapshot.expires_at_ms, 0);
    }
}
