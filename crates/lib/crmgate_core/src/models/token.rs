//! Service identity token model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the one durable record holding the process-wide service token.
pub const SERVICE_TOKEN_KEY: &str = "chatai_service_token";

/// Credential representing this process (not an end user) against the
/// downstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix epoch milliseconds.
    pub expires_at_ms: i64,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceToken {
    /// Build a token that expires `expires_in_secs` after `now`.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at_ms: now.timestamp_millis() + expires_in_secs * 1000,
            issued_at: now,
            updated_at: now,
        }
    }

    /// True when the token outlives `now` by more than `buffer_ms`.
    pub fn is_fresh(&self, now: DateTime<Utc>, buffer_ms: i64) -> bool {
        self.expires_at_ms > now.timestamp_millis() + buffer_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_expiry_is_relative_to_now() {
        let now = Utc::now();
        let token = ServiceToken::issued("a".into(), "r".into(), 3600, now);
        assert_eq!(token.expires_at_ms, now.timestamp_millis() + 3_600_000);
    }

    #[test]
    fn freshness_respects_buffer() {
        let now = Utc::now();
        let token = ServiceToken::issued("a".into(), "r".into(), 240, now);
        assert!(token.is_fresh(now, 0));
        assert!(!token.is_fresh(now, 5 * 60 * 1000));
    }
}
