//! `reqwest`-backed transport for the Tree Schema REST API.
//!
//! - Base URL is `{host}/v1/`; request paths are joined relative to it
//! - Auth via `x-ts-email` / `x-ts-secret-key` headers
//! - Every request carries a fresh `x-request-id` for server-side correlation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ApiRequest, Method, Transport, Upload};
use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError, Result, TreeSchemaError};

/// The API version prefix appended to the configured host.
const API_PREFIX: &str = "v1/";

/// Live HTTP transport.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    email: String,
    secret_key: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("email", &self.email)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport for the configured host with explicit credentials.
    pub fn new(config: &ClientConfig, secret_key: String) -> Result<Self> {
        let base_url = Self::base_url(&config.host)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Connection {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            email: config.email.clone(),
            secret_key,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Normalise a host into the versioned API root, e.g.
    /// `https://api.example.com` → `https://api.example.com/v1/`.
    fn base_url(host: &str) -> Result<Url> {
        let trimmed = host.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
        let root = Url::parse(&format!("{}/", trimmed)).map_err(|e| ConfigError::Invalid {
            message: format!("host '{}' is not a valid URL: {}", host, e),
        })?;
        root.join(API_PREFIX).map_err(|e| {
            ConfigError::Invalid {
                message: format!("cannot build API root from '{}': {}", host, e),
            }
            .into()
        })
    }

    fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Request {
                message: format!("invalid request path '{}': {}", path, e),
            })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-ts-email", &self.email)
            .header("x-ts-secret-key", &self.secret_key)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .header("accept", "application/json")
    }

    fn map_send_error(&self, err: reqwest::Error) -> TreeSchemaError {
        if err.is_timeout() {
            ApiError::Timeout {
                timeout_secs: self.timeout_secs,
            }
            .into()
        } else if err.is_connect() {
            ApiError::Connection {
                message: err.to_string(),
            }
            .into()
        } else {
            ApiError::Request {
                message: format!("Request to Tree Schema API failed: {}", err),
            }
            .into()
        }
    }

    async fn finish(&self, path: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body_text = response.text().await.map_err(|e| ApiError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(map_http_error(
                status,
                &body_text,
                path,
                &self.email,
                retry_after,
            ));
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| {
            ApiError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            }
            .into()
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let url = self.url_for(&request.path, &request.query)?;
        debug!(method = %request.method, url = url.as_str(), "Sending Tree Schema request");

        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.finish(&request.path, response).await
    }

    async fn upload(&self, upload: Upload) -> Result<Value> {
        let url = self.url_for(&upload.path, &[])?;
        debug!(
            url = url.as_str(),
            file_name = upload.file_name.as_str(),
            bytes = upload.content.len(),
            "Uploading file to Tree Schema"
        );

        let part = reqwest::multipart::Part::stream(upload.content.clone())
            .file_name(upload.file_name.clone())
            .mime_str("application/json")
            .map_err(|e| ApiError::Request {
                message: format!("Invalid upload content type: {}", e),
            })?;
        let form = reqwest::multipart::Form::new().part(upload.field.clone(), part);

        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            // Manifests routinely run to tens of megabytes.
            .timeout(Duration::from_secs(self.timeout_secs.saturating_mul(4)))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.finish(&upload.path, response).await
    }
}

/// Extract a human-readable message from an error body.
fn error_message(body_text: &str) -> String {
    serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body_text.trim().to_string())
}

/// Map an HTTP status code to the appropriate error.
pub(crate) fn map_http_error(
    status: StatusCode,
    body_text: &str,
    path: &str,
    account: &str,
    retry_after: Option<u64>,
) -> TreeSchemaError {
    match status.as_u16() {
        401 | 403 => ApiError::AuthFailed {
            account: account.to_string(),
        }
        .into(),
        404 => TreeSchemaError::not_found("resource", path),
        409 => TreeSchemaError::Conflict {
            kind: "resource".to_string(),
            key: error_message(body_text),
        },
        400 | 422 => TreeSchemaError::validation(error_message(body_text)),
        429 => {
            let from_body = serde_json::from_str::<Value>(body_text)
                .ok()
                .and_then(|v| v["retry_after_secs"].as_u64());
            ApiError::RateLimited {
                retry_after_secs: retry_after.or(from_body).unwrap_or(30),
            }
            .into()
        }
        _ => ApiError::Status {
            status: status.as_u16(),
            body: body_text.to_string(),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> ClientConfig {
        ClientConfig {
            host: host.to_string(),
            email: "me@example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_appends_version() {
        let t = HttpTransport::new(&config("https://api.example.com"), "k".into()).unwrap();
        assert_eq!(t.base_url.as_str(), "https://api.example.com/v1/");
    }

    #[test]
    fn test_base_url_tolerates_trailing_slash_and_version() {
        for host in [
            "https://api.example.com/",
            "https://api.example.com/v1",
            "https://api.example.com/v1/",
        ] {
            let t = HttpTransport::new(&config(host), "k".into()).unwrap();
            assert_eq!(t.base_url.as_str(), "https://api.example.com/v1/", "{host}");
        }
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let t = HttpTransport::new(&config("https://gw.example.com/treeschema"), "k".into())
            .unwrap();
        assert_eq!(t.base_url.as_str(), "https://gw.example.com/treeschema/v1/");
    }

    #[test]
    fn test_invalid_host_is_config_error() {
        let err = HttpTransport::new(&config("not a url"), "k".into()).unwrap_err();
        assert!(matches!(err, TreeSchemaError::Config(_)));
    }

    #[test]
    fn test_url_for_encodes_query() {
        let t = HttpTransport::new(&config("https://api.example.com"), "k".into()).unwrap();
        let url = t
            .url_for(
                "data-stores/4/schemas",
                &[("name".to_string(), "dvc.info.raw:v1 #2".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/data-stores/4/schemas?name=dvc.info.raw%3Av1+%232"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let t = HttpTransport::new(&config("https://api.example.com"), "ts-secret".into())
            .unwrap();
        let rendered = format!("{:?}", t);
        assert!(!rendered.contains("ts-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_http_error_mapping() {
        let err = map_http_error(StatusCode::UNAUTHORIZED, "", "users", "me@example.com", None);
        assert!(matches!(
            err,
            TreeSchemaError::Api(ApiError::AuthFailed { ref account }) if account == "me@example.com"
        ));

        let err = map_http_error(StatusCode::NOT_FOUND, "", "users/7", "a", None);
        assert!(err.is_not_found());

        let err = map_http_error(
            StatusCode::CONFLICT,
            r#"{"message":"name already exists"}"#,
            "data-stores",
            "a",
            None,
        );
        match err {
            TreeSchemaError::Conflict { key, .. } => assert_eq!(key, "name already exists"),
            other => panic!("Expected Conflict, got {:?}", other),
        }

        let err = map_http_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"type is required"}"#,
            "data-stores",
            "a",
            None,
        );
        match err {
            TreeSchemaError::Validation { message } => assert_eq!(message, "type is required"),
            other => panic!("Expected Validation, got {:?}", other),
        }

        let err = map_http_error(StatusCode::TOO_MANY_REQUESTS, "{}", "users", "a", Some(12));
        assert!(matches!(
            err,
            TreeSchemaError::Api(ApiError::RateLimited {
                retry_after_secs: 12
            })
        ));

        let err = map_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"retry_after_secs":4}"#,
            "users",
            "a",
            None,
        );
        assert!(matches!(
            err,
            TreeSchemaError::Api(ApiError::RateLimited {
                retry_after_secs: 4
            })
        ));

        let err = map_http_error(StatusCode::BAD_GATEWAY, "upstream down", "users", "a", None);
        match err {
            TreeSchemaError::Api(ApiError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }
}
