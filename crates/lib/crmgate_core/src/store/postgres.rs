//! PostgreSQL-backed stores.
//!
//! Tables come from `crmgate_core/migrations/` (see [`crate::migrate`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, TokenStore, UserStore};
use crate::models::auth::{NewUserRecord, RefreshTokenRecord, Role, UserCredentialRecord};
use crate::models::token::ServiceToken;

type UserRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn user_from_row(row: UserRow) -> UserCredentialRecord {
    let (id, email, password_hash, first_name, last_name, role, created_at, updated_at) = row;
    UserCredentialRecord {
        id,
        email,
        password_hash,
        first_name,
        last_name,
        role: role.as_deref().and_then(Role::parse),
        created_at,
        updated_at,
    }
}

/// Service-token record in the `api_tokens` table.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn load(&self, key: &str) -> Result<Option<ServiceToken>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT token, refresh_token, expires_at, created_at, updated_at \
             FROM api_tokens WHERE id = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(access_token, refresh_token, expires_at_ms, issued_at, updated_at)| ServiceToken {
                access_token,
                refresh_token,
                expires_at_ms,
                issued_at,
                updated_at,
            },
        ))
    }

    async fn save(&self, key: &str, token: &ServiceToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO api_tokens (id, token, refresh_token, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
               token = EXCLUDED.token, \
               refresh_token = EXCLUDED.refresh_token, \
               expires_at = EXCLUDED.expires_at, \
               created_at = EXCLUDED.created_at, \
               updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at_ms)
        .bind(token.issued_at)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Users in `auth_users`, refresh tokens in `auth_tokens`.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentialRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id::text, email, password_hash, first_name, last_name, role, created_at, updated_at \
             FROM auth_users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserCredentialRecord>, StoreError> {
        let Ok(id) = Uuid::parse_str(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id::text, email, password_hash, first_name, last_name, role, created_at, updated_at \
             FROM auth_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn insert_user(&self, user: NewUserRecord) -> Result<UserCredentialRecord, StoreError> {
        let id = Uuid::now_v7();
        let (created_at, updated_at) = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
            "INSERT INTO auth_users (id, email, password_hash, first_name, last_name, role) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING created_at, updated_at",
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.map(|r| r.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(format!("email '{}' already exists", user.email))
            }
            other => StoreError::Db(other),
        })?;

        Ok(UserCredentialRecord {
            id: id.to_string(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            created_at,
            updated_at,
        })
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auth_tokens (id, user_id, token_hash, expires_at, created_at) \
             VALUES ($1, $2::uuid, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        user_id: &str,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let Ok(uid) = Uuid::parse_str(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, (Uuid, String, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT id, user_id::text, token_hash, expires_at, created_at \
             FROM auth_tokens WHERE user_id = $1 AND token_hash = $2",
        )
        .bind(uid)
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, user_id, token_hash, expires_at, created_at)| RefreshTokenRecord {
                id,
                user_id,
                token_hash,
                expires_at,
                created_at,
            },
        ))
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let Ok(uid) = Uuid::parse_str(user_id) else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
