//! The client session.
//!
//! A [`TreeSchema`] owns the transport and configuration for one account. It is
//! cheap to clone and every entity handle carries its own copy, so handles never
//! depend on ambient global state.

use serde_json::Value;
use std::sync::Arc;

use crate::config::{ClientConfig, load_config};
use crate::credentials::{KeyringCredentialStore, resolve_secret_key};
use crate::entities::{
    DataStore, DataStoreRecord, NewDataStore, NewTransformation, NewUser, Transformation,
    TransformationRecord, User, UserRecord, data_stores, transformations, users,
};
use crate::error::{ConfigError, Result};
use crate::resolver::Lookup;
use crate::transport::{
    ApiRequest, HttpTransport, Transport, Upload, with_retry, with_retry_unsent,
};

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

/// A session against one Tree Schema account.
#[derive(Clone)]
pub struct TreeSchema {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for TreeSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSchema")
            .field("host", &self.inner.config.host)
            .field("email", &self.inner.config.email)
            .finish()
    }
}

impl TreeSchema {
    /// Open a session with an account e-mail and secret key.
    ///
    /// The endpoint comes from layered configuration, so `TREE_SCHEMA_HOST`
    /// (or `TREESCHEMA_HOST`) selects the server.
    pub fn new(email: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let mut config = load_config(None, None).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.email = email.into();
        Self::with_secret(config, secret_key.into())
    }

    /// Open a session from configuration, resolving the secret key from the OS
    /// keyring or the configured environment variable.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        if config.email.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "email".to_string(),
            }
            .into());
        }
        let secret = resolve_secret_key(&config, &KeyringCredentialStore::new())?;
        Self::with_secret(config, secret)
    }

    /// Open a session from configuration with an explicit secret key.
    pub fn with_secret(config: ClientConfig, secret_key: String) -> Result<Self> {
        for warning in config.validate() {
            tracing::warn!(warning = warning.as_str(), "Suspicious client configuration");
        }
        let transport = HttpTransport::new(&config, secret_key)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build a session over any transport, e.g. [`MockTransport`](crate::transport::MockTransport).
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner { transport, config }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) async fn send(&self, request: ApiRequest) -> Result<Value> {
        let transport = &self.inner.transport;
        with_retry(&self.inner.config.retry, || transport.send(request.clone())).await
    }

    /// Send a write whose replay would duplicate its effect. Only retried when
    /// the request provably never reached the server.
    pub(crate) async fn send_unreplayable(&self, request: ApiRequest) -> Result<Value> {
        let transport = &self.inner.transport;
        with_retry_unsent(&self.inner.config.retry, || transport.send(request.clone())).await
    }

    pub(crate) async fn upload(&self, upload: Upload) -> Result<Value> {
        let transport = &self.inner.transport;
        with_retry_unsent(&self.inner.config.retry, || transport.upload(upload.clone())).await
    }

    /// List every user on the account.
    pub async fn get_users(&self) -> Result<Vec<User>> {
        let records: Vec<UserRecord> = users(self).list().await?;
        Ok(records
            .into_iter()
            .map(|r| User::from_record(self.clone(), r))
            .collect())
    }

    /// Resolve a user by ID, by e-mail, or get-or-create from a [`NewUser`].
    pub async fn user(&self, lookup: impl Into<Lookup<NewUser>>) -> Result<User> {
        let record: UserRecord = users(self).resolve(lookup.into()).await?;
        Ok(User::from_record(self.clone(), record))
    }

    pub async fn get_data_stores(&self) -> Result<Vec<DataStore>> {
        let records: Vec<DataStoreRecord> = data_stores(self).list().await?;
        Ok(records
            .into_iter()
            .map(|r| DataStore::from_record(self.clone(), r))
            .collect())
    }

    /// Resolve a data store by ID, by name, or get-or-create from a [`NewDataStore`].
    pub async fn data_store(&self, lookup: impl Into<Lookup<NewDataStore>>) -> Result<DataStore> {
        let record: DataStoreRecord = data_stores(self).resolve(lookup.into()).await?;
        Ok(DataStore::from_record(self.clone(), record))
    }

    pub async fn get_transformations(&self) -> Result<Vec<Transformation>> {
        let records: Vec<TransformationRecord> = transformations(self).list().await?;
        Ok(records
            .into_iter()
            .map(|r| Transformation::from_record(self.clone(), r))
            .collect())
    }

    /// Resolve a transformation by ID, by name, or get-or-create from a [`NewTransformation`].
    pub async fn transformation(
        &self,
        lookup: impl Into<Lookup<NewTransformation>>,
    ) -> Result<Transformation> {
        let record: TransformationRecord = transformations(self).resolve(lookup.into()).await?;
        Ok(Transformation::from_record(self.clone(), record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::{ApiError, TreeSchemaError};
    use crate::transport::MockTransport;

    fn session(mock: Arc<MockTransport>) -> TreeSchema {
        let config = ClientConfig {
            email: "me@example.com".into(),
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        };
        TreeSchema::with_transport(mock, config)
    }

    #[tokio::test]
    async fn test_send_retries_rate_limited_requests() {
        let mock = Arc::new(MockTransport::new());
        mock.seed_user("me@example.com");
        mock.fail_next(429, "{}");
        let ts = session(mock.clone());
        let users = ts.get_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_send_does_not_retry_server_errors() {
        let mock = Arc::new(MockTransport::new());
        mock.fail_next(500, "boom");
        let ts = session(mock.clone());
        let err = ts.get_users().await.unwrap_err();
        assert!(matches!(
            err,
            TreeSchemaError::Api(ApiError::Status { status: 500, .. })
        ));
        assert_eq!(mock.requests().len(), 1);
    }

    #[test]
    fn test_from_config_requires_email() {
        let err = TreeSchema::from_config(ClientConfig::default()).unwrap_err();
        assert!(matches!(err, TreeSchemaError::Config(_)));
    }

    #[test]
    fn test_debug_omits_secret() {
        let ts = TreeSchema::with_secret(
            ClientConfig {
                email: "me@example.com".into(),
                ..Default::default()
            },
            "ts-secret".into(),
        )
        .unwrap();
        let rendered = format!("{:?}", ts);
        assert!(rendered.contains("me@example.com"));
        assert!(!rendered.contains("ts-secret"));
    }
}
