//! Self-contained backend: users in a [`UserStore`], tokens signed locally.
//!
//! Passwords are bcrypt-hashed. Access and refresh tokens are HS256 JWTs;
//! every issued refresh token is recorded (as a SHA-256 hash) and rotated on
//! use, so a refresh token works exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{IssuedToken, TokenIssuer, TokenKind};
use super::password::{hash_password, validate_password, verify_password};
use super::{AuthError, AuthRepository};
use crate::models::auth::{
    AuthResult, AuthUser, LoginRequest, NewUserRecord, RefreshTokenRecord, RegisterRequest, Role,
    TokenRefreshResult, TokenVerificationResult, UserCredentialRecord,
};
use crate::store::{StoreError, UserStore};

/// Account created on first use when none exists for its email.
#[derive(Clone)]
pub struct SeedAccount {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SeedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAccount")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Registration allowlist: an email is accepted when its domain contains one
/// of the entries. An empty list accepts every domain.
#[derive(Debug, Clone, Default)]
pub struct DomainAllowlist {
    entries: Vec<String>,
}

impl DomainAllowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn allows(&self, email: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        let domain = domain.to_lowercase();
        !domain.is_empty() && self.entries.iter().any(|e| domain.contains(e.as_str()))
    }
}

/// Self-issued-JWT auth backend.
pub struct DocumentAuthRepository {
    users: Arc<dyn UserStore>,
    issuer: TokenIssuer,
    allowlist: DomainAllowlist,
    seed: Option<SeedAccount>,
    seeded: OnceCell<()>,
}

impl DocumentAuthRepository {
    pub fn new(
        users: Arc<dyn UserStore>,
        issuer: TokenIssuer,
        allowlist: DomainAllowlist,
        seed: Option<SeedAccount>,
    ) -> Self {
        Self {
            users,
            issuer,
            allowlist,
            seed,
            seeded: OnceCell::new(),
        }
    }

    /// Create the seed account once per process. Failures are logged only.
    pub async fn ensure_seeded(&self) {
        self.seeded
            .get_or_init(|| async {
                let Some(seed) = &self.seed else {
                    debug!("no default user configured, skipping seed");
                    return;
                };
                if let Err(e) = self.seed_account(seed).await {
                    warn!(email = %seed.email, error = %e, "failed to seed default user");
                }
            })
            .await;
    }

    async fn seed_account(&self, seed: &SeedAccount) -> Result<(), AuthError> {
        let email = seed.email.to_lowercase();
        if self.users.find_user_by_email(&email).await?.is_some() {
            debug!(%email, "default user already exists");
            return Ok(());
        }
        let record = NewUserRecord {
            email: email.clone(),
            password_hash: hash_password(&seed.password)?,
            first_name: "Admin".into(),
            last_name: "User".into(),
            role: Some(Role::Admin),
        };
        match self.users.insert_user(record).await {
            Ok(_) => info!(%email, "default user created"),
            Err(StoreError::Duplicate(_)) => debug!(%email, "default user created concurrently"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn create_user(
        &self,
        request: &RegisterRequest,
        role: Option<Role>,
    ) -> Result<AuthResult, AuthError> {
        self.ensure_seeded().await;

        let email = request.email.trim().to_lowercase();
        if !self.allowlist.allows(&email) {
            return Err(AuthError::Validation(
                "Registration is restricted to company email addresses".into(),
            ));
        }
        validate_password(&request.password)?;

        // Friendly message for the common case; the store enforces uniqueness.
        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict("Email already registered".into()));
        }

        let record = NewUserRecord {
            email,
            password_hash: hash_password(&request.password)?,
            first_name: request.first_name.trim().to_string(),
            last_name: request
                .last_name
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string(),
            role,
        };
        let user = self.users.insert_user(record).await.map_err(|e| match e {
            StoreError::Duplicate(_) => AuthError::Conflict("Email already registered".into()),
            other => other.into(),
        })?;
        info!(user_id = %user.id, email = %user.email, "user registered");

        self.session_for(&user).await
    }

    /// Issue an access/refresh pair and record the refresh token.
    async fn session_for(&self, user: &UserCredentialRecord) -> Result<AuthResult, AuthError> {
        let (access, refresh) = self.issue_pair(user).await?;
        Ok(AuthResult {
            user: user.to_user(),
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.issuer.access_ttl_secs(),
        })
    }

    async fn issue_pair(
        &self,
        user: &UserCredentialRecord,
    ) -> Result<(IssuedToken, IssuedToken), AuthError> {
        let access = self
            .issuer
            .issue(TokenKind::Access, &user.id, &user.email, user.role)?;
        let refresh = self
            .issuer
            .issue(TokenKind::Refresh, &user.id, &user.email, user.role)?;
        self.users
            .insert_refresh_token(&RefreshTokenRecord {
                id: Uuid::now_v7(),
                user_id: user.id.clone(),
                token_hash: hash_refresh_token(&refresh.token),
                expires_at: refresh.expires_at,
                created_at: Utc::now(),
            })
            .await?;
        Ok((access, refresh))
    }
}

/// Hex SHA-256 of a refresh token value.
fn hash_refresh_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl AuthRepository for DocumentAuthRepository {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResult, AuthError> {
        self.create_user(request, None).await
    }

    async fn register_with_role(
        &self,
        request: &RegisterRequest,
        role: Role,
    ) -> Result<AuthResult, AuthError> {
        self.create_user(request, Some(role)).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResult, AuthError> {
        self.ensure_seeded().await;

        let invalid = || AuthError::Unauthorized("Invalid email or password".into());
        let email = request.email.trim().to_lowercase();
        let user = self
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or_else(invalid)?;
        if !verify_password(&request.password, &user.password_hash)? {
            return Err(invalid());
        }
        info!(user_id = %user.id, "login successful");
        self.session_for(&user).await
    }

    async fn verify_token(&self, token: &str) -> Result<TokenVerificationResult, AuthError> {
        match self.issuer.verify(token, TokenKind::Access) {
            Ok(claims) => Ok(claims.to_verification()),
            Err(reason) => {
                debug!(%reason, "access token rejected");
                Ok(TokenVerificationResult::invalid())
            }
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResult, AuthError> {
        let claims = self
            .issuer
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|e| AuthError::Unauthorized(format!("Invalid refresh token: {e}")))?;

        let hash = hash_refresh_token(refresh_token);
        let Some(record) = self.users.find_refresh_token(&claims.user_id, &hash).await? else {
            return Err(AuthError::Unauthorized("Refresh token not recognized".into()));
        };

        // Rotation: the old token is gone before the new one exists. Only the
        // caller whose delete removed the record may continue.
        if !self.users.delete_refresh_token(record.id).await? {
            return Err(AuthError::Unauthorized("Refresh token not recognized".into()));
        }
        if record.expires_at <= Utc::now() {
            return Err(AuthError::Unauthorized("Refresh token expired".into()));
        }

        let user = self
            .users
            .get_user(&claims.user_id)
            .await?
            .ok_or_else(|| AuthError::Unauthorized("User no longer exists".into()))?;
        let (access, refresh) = self.issue_pair(&user).await?;
        debug!(user_id = %user.id, "refresh token rotated");

        Ok(TokenRefreshResult {
            access_token: access.token,
            refresh_token: Some(refresh.token),
            expires_in: self.issuer.access_ttl_secs(),
        })
    }

    /// Deletes every refresh token of the token's user. Access and refresh
    /// tokens are both accepted, expired or not.
    async fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        let claims = self
            .issuer
            .decode_ignoring_expiry(token, TokenKind::Refresh)
            .or_else(|_| self.issuer.decode_ignoring_expiry(token, TokenKind::Access));
        let Ok(claims) = claims else {
            return Ok(false);
        };
        let removed = self
            .users
            .delete_refresh_tokens_for_user(&claims.user_id)
            .await?;
        info!(user_id = %claims.user_id, removed, "refresh tokens revoked");
        Ok(true)
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<AuthUser>, AuthError> {
        Ok(self.users.get_user(user_id).await?.map(|u| u.to_user()))
    }
}
