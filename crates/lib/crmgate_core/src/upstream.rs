//! Calls to the downstream service API on behalf of the service identity.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::http::{ApiClient, HttpError};
use crate::token::{TokenError, TokenManager};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Downstream API client authenticated with the managed service token.
#[derive(Clone)]
pub struct ServiceApiClient {
    api: ApiClient,
    tokens: Arc<TokenManager>,
}

impl ServiceApiClient {
    pub fn new(api: ApiClient, tokens: Arc<TokenManager>) -> Self {
        Self { api, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// GET `endpoint` with the service token. A 401 forces a fresh sign-in
    /// and the call is retried once.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, UpstreamError> {
        let token = self.tokens.get_token().await?;
        match self.api.get::<T>(endpoint, Some(token.as_str())).await {
            Err(e) if e.status() == Some(StatusCode::UNAUTHORIZED) => {
                warn!(endpoint, "service token rejected, re-authenticating");
                let token = self.tokens.force_reauthenticate().await?;
                debug!(endpoint, "retrying with fresh service token");
                Ok(self.api.get::<T>(endpoint, Some(token.as_str())).await?)
            }
            other => Ok(other?),
        }
    }
}
