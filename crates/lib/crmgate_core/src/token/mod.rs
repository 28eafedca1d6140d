//! Service identity token lifecycle.
//!
//! [`TokenManager`] hands out a valid access token for the service identity,
//! consulting in order the in-memory [`TokenCache`], the durable
//! [`TokenStore`](crate::store::TokenStore), a refresh-grant exchange and
//! finally a full sign-in through a [`CredentialAuthenticator`].

pub mod cache;
pub mod identity;
pub mod manager;

pub use cache::{CachedToken, TokenCache};
pub use identity::{CredentialAuthenticator, IdentityToolkitAuthenticator, SignInGrant};
pub use manager::{EXPIRY_BUFFER, ServiceCredentials, TokenManager};

use thiserror::Error;

/// Token lifecycle errors.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Service identity not configured: {0}")]
    NotConfigured(String),

    #[error("Sign-in failed ({code}): {message}")]
    SignIn { code: String, message: String },

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}
