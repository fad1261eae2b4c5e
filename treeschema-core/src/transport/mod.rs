//! Transport layer between the client session and the Tree Schema REST API.
//!
//! Provides the `Transport` trait plus two implementations:
//! - `HttpTransport` talks to a live server over `reqwest`.
//! - `MockTransport` is an in-memory catalog with the same REST surface, used in tests.
//!
//! `with_retry()` wraps any request in exponential backoff for transient failures.
//! `with_retry_unsent()` does the same for writes that must not be replayed once
//! the server may have received them.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{ApiError, Result, TreeSchemaError};

pub use http::HttpTransport;
pub use mock::{MockTransport, RecordedRequest};

/// HTTP verb of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Whether requests with this verb change server state.
    pub fn is_write(self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A JSON request against a path relative to the `/v1/` API root.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Delete, path).with_body(body)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a query parameter by name.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A multipart file submission.
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: String,
    /// Multipart form field the file is attached to.
    pub field: String,
    pub file_name: String,
    pub content: Bytes,
}

/// Trait for the wire between a session and the catalog service.
///
/// Implementations map HTTP status codes onto the crate error taxonomy:
/// 404 → `NotFound`, 409 → `Conflict`, 400/422 → `Validation`, everything else
/// to an [`ApiError`]. Empty response bodies come back as `Value::Null`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON request and return the decoded response body.
    async fn send(&self, request: ApiRequest) -> Result<Value>;

    /// Submit a file as multipart form data and return the decoded response body.
    async fn upload(&self, upload: Upload) -> Result<Value>;
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `ApiError::RateLimited` (respects `retry_after_secs`),
/// `ApiError::Connection` and `ApiError::Timeout`. Everything else returns immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_while(config, is_retryable, operation).await
}

/// Like [`with_retry`], but only retries failures that prove the request never
/// reached the server: `ApiError::RateLimited` and `ApiError::Connection`.
///
/// A timed-out upload may already have been accepted, so it is returned to the
/// caller instead of being sent a second time.
pub async fn with_retry_unsent<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_while(config, is_unsent, operation).await
}

async fn retry_while<F, Fut, T>(
    config: &RetryConfig,
    should_retry: fn(&TreeSchemaError) -> bool,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !should_retry(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ApiError::Connection {
            message: "All retry attempts exhausted".to_string(),
        }
        .into()
    }))
}

fn is_retryable(err: &TreeSchemaError) -> bool {
    matches!(
        err,
        TreeSchemaError::Api(
            ApiError::RateLimited { .. } | ApiError::Connection { .. } | ApiError::Timeout { .. }
        )
    )
}

fn is_unsent(err: &TreeSchemaError) -> bool {
    matches!(
        err,
        TreeSchemaError::Api(ApiError::RateLimited { .. } | ApiError::Connection { .. })
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &TreeSchemaError) -> u64 {
    if let TreeSchemaError::Api(ApiError::RateLimited { retry_after_secs }) = err {
        let server_ms = retry_after_secs * 1000;
        return server_ms.max(compute_exponential_backoff(config, attempt));
    }
    compute_exponential_backoff(config, attempt)
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
