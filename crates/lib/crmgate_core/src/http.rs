//! Outbound HTTP helper shared by the remote auth backends and the token manager.
//!
//! Joins endpoints onto a base URL, adds default headers, enforces a per-call
//! timeout and retries transient failures (network errors, 5xx) a bounded
//! number of times with a fixed delay. Client errors (4xx) are never retried.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Per-call timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Outbound call failures.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        status: StatusCode,
        message: String,
        /// Parsed error body, kept as debug detail only.
        body: Option<Value>,
        endpoint: String,
    },

    #[error("External service unavailable ({endpoint}): {message}")]
    Unavailable { message: String, endpoint: String },

    #[error("Invalid response from {endpoint}: {message}")]
    Decode { message: String, endpoint: String },
}

impl HttpError {
    /// Upstream status, when the upstream answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message without the endpoint prefix.
    pub fn message(&self) -> &str {
        match self {
            HttpError::Status { message, .. }
            | HttpError::Unavailable { message, .. }
            | HttpError::Decode { message, .. } => message,
        }
    }

    /// Leading error code of provider messages such as
    /// `"WEAK_PASSWORD : Password should be at least 6 characters"`.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            HttpError::Status { message, .. } => message.split([' ', ':']).find(|p| !p.is_empty()),
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            HttpError::Unavailable { .. } => true,
            HttpError::Status { status, .. } => status.is_server_error(),
            HttpError::Decode { .. } => false,
        }
    }
}

/// Connection settings for one upstream service.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Headers sent with every request (e.g. `X-API-Key`).
    pub headers: Vec<(String, String)>,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Add a default header; empty values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.headers.push((name.to_string(), value.to_string()));
        }
        self
    }
}

/// JSON client bound to one base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    config: ApiClientConfig,
}

impl ApiClient {
    pub fn new(client: Client, config: ApiClientConfig) -> Self {
        Self { client, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Join `endpoint` onto the base URL with exactly one slash between them.
    pub fn build_url(&self, endpoint: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            return base.to_string();
        }
        format!("{base}/{endpoint}")
    }

    /// `GET` and decode a JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
    ) -> Result<T, HttpError> {
        let body = self.send(Method::GET, endpoint, bearer, |rb| rb).await?;
        decode(&body, endpoint)
    }

    /// `POST` a JSON body and decode a JSON response.
    pub async fn post<T, B>(&self, endpoint: &str, body: &B, bearer: Option<&str>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let bytes = self
            .send(Method::POST, endpoint, bearer, |rb| rb.json(body))
            .await?;
        decode(&bytes, endpoint)
    }

    /// `POST` a JSON body, ignoring whatever the upstream answers on success.
    pub async fn post_discard<B>(
        &self,
        endpoint: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<(), HttpError>
    where
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, endpoint, bearer, |rb| rb.json(body))
            .await
            .map(|_| ())
    }

    /// `POST` a JSON body with query parameters.
    pub async fn post_with_query<T, B>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let bytes = self
            .send(Method::POST, endpoint, None, |rb| rb.query(query).json(body))
            .await?;
        decode(&bytes, endpoint)
    }

    /// `POST` an `application/x-www-form-urlencoded` body.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        form: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let bytes = self
            .send(Method::POST, endpoint, None, |rb| rb.query(query).form(form))
            .await?;
        decode(&bytes, endpoint)
    }

    async fn send<F>(
        &self,
        method: Method,
        endpoint: &str,
        bearer: Option<&str>,
        attach: F,
    ) -> Result<Vec<u8>, HttpError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.build_url(endpoint);
        let attempts = self.config.retry_attempts + 1;

        for attempt in 1..=attempts {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .timeout(self.config.timeout);
            for (name, value) in &self.config.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            debug!(%method, endpoint, attempt, "upstream request");
            let result = match attach(request).send().await {
                Ok(resp) => read_response(resp, endpoint).await,
                Err(e) => Err(HttpError::Unavailable {
                    message: e.to_string(),
                    endpoint: endpoint.to_string(),
                }),
            };

            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(%method, endpoint, attempt, error = %e, "transient upstream failure, retrying");
                    sleep(self.config.retry_delay).await;
                }
                other => return other,
            }
        }

        Err(HttpError::Unavailable {
            message: format!("no attempt made after {attempts} tries"),
            endpoint: endpoint.to_string(),
        })
    }
}

async fn read_response(resp: Response, endpoint: &str) -> Result<Vec<u8>, HttpError> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| HttpError::Unavailable {
        message: format!("reading body: {e}"),
        endpoint: endpoint.to_string(),
    })?;

    if status.is_success() {
        return Ok(bytes.to_vec());
    }

    let body: Option<Value> = serde_json::from_slice(&bytes).ok();
    let message = body
        .as_ref()
        .and_then(extract_message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("upstream error").to_string());

    Err(HttpError::Status {
        status,
        message,
        body,
        endpoint: endpoint.to_string(),
    })
}

/// Pull a message out of the error body shapes seen upstream:
/// `{"message": ..}`, `{"error": {"message": ..}}` and `{"error": ".."}`.
fn extract_message(body: &Value) -> Option<String> {
    let message = match body.get("message") {
        Some(Value::String(m)) => Some(m.clone()),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    };
    message.or_else(|| match body.get("error") {
        Some(Value::Object(err)) => err.get("message").and_then(Value::as_str).map(str::to_string),
        Some(Value::String(code)) => Some(
            body.get("error_description")
                .and_then(Value::as_str)
                .map_or_else(|| code.clone(), |d| format!("{code}: {d}")),
        ),
        _ => None,
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8], endpoint: &str) -> Result<T, HttpError> {
    serde_json::from_slice(bytes).map_err(|e| HttpError::Decode {
        message: e.to_string(),
        endpoint: endpoint.to_string(),
    })
}
