//! Durable storage behind the token manager and the self-issued-JWT backend.
//!
//! Two seams:
//! - [`TokenStore`] — the one service-token record shared across restarts and
//!   across process instances.
//! - [`UserStore`] — user and refresh-token collections.
//!
//! [`postgres`] is the production implementation; [`memory`] keeps everything
//! in-process for single-node runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{NewUserRecord, RefreshTokenRecord, UserCredentialRecord};
use crate::models::token::ServiceToken;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of the service token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the record stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<ServiceToken>, StoreError>;

    /// Upsert the token fields under `key`. Other fields of the record are
    /// left untouched.
    async fn save(&self, key: &str, token: &ServiceToken) -> Result<(), StoreError>;
}

/// User and refresh-token collections.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by (lower-case) email.
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentialRecord>, StoreError>;

    /// Fetch a user by ID. Unknown or malformed IDs yield `None`.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserCredentialRecord>, StoreError>;

    /// Insert a user. Fails with [`StoreError::Duplicate`] when the email is taken.
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserCredentialRecord, StoreError>;

    /// Store one issued refresh token.
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Find a refresh token of `user_id` by hash.
    async fn find_refresh_token(
        &self,
        user_id: &str,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Delete one refresh token. Returns whether it existed.
    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete every refresh token of a user. Returns how many were removed.
    async fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<u64, StoreError>;
}
