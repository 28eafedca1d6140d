//! In-process stores backed by `DashMap`.
//!
//! Nothing survives a restart; use for single-node runs and tests.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::{StoreError, TokenStore, UserStore};
use crate::models::auth::{NewUserRecord, RefreshTokenRecord, UserCredentialRecord};
use crate::models::token::ServiceToken;

/// Service-token records keyed by document key.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: DashMap<String, ServiceToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, key: &str) -> Result<Option<ServiceToken>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn save(&self, key: &str, token: &ServiceToken) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), token.clone());
        Ok(())
    }
}

/// Users and refresh tokens kept in memory.
///
/// Email uniqueness is enforced atomically through the email index entry.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserCredentialRecord>,
    emails: DashMap<String, String>,
    refresh_tokens: DashMap<Uuid, RefreshTokenRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh tokens currently stored for `user_id`.
    pub fn refresh_token_count(&self, user_id: &str) -> usize {
        self.refresh_tokens
            .iter()
            .filter(|r| r.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentialRecord>, StoreError> {
        let Some(id) = self.emails.get(&email.to_lowercase()).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|r| r.value().clone()))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserCredentialRecord>, StoreError> {
        Ok(self.users.get(user_id).map(|r| r.value().clone()))
    }

    async fn insert_user(&self, user: NewUserRecord) -> Result<UserCredentialRecord, StoreError> {
        let key = user.email.to_lowercase();
        match self.emails.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "email '{}' already exists",
                user.email
            ))),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let record = UserCredentialRecord {
                    id: Uuid::now_v7().to_string(),
                    email: user.email,
                    password_hash: user.password_hash,
                    first_name: user.first_name,
                    last_name: user.last_name,
                    role: user.role,
                    created_at: now,
                    updated_at: now,
                };
                self.users.insert(record.id.clone(), record.clone());
                slot.insert(record.id.clone());
                Ok(record)
            }
        }
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        user_id: &str,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .refresh_tokens
            .iter()
            .find(|r| r.user_id == user_id && r.token_hash == token_hash)
            .map(|r| r.value().clone()))
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.refresh_tokens.remove(&id).is_some())
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|_, r| r.user_id != user_id);
        Ok((before - self.refresh_tokens.len()) as u64)
    }
}
