//! Credential storage for Tree Schema secret keys.
//!
//! Provides a trait-based abstraction over credential storage with two implementations:
//! - `KeyringCredentialStore`: Uses the OS-native credential store (macOS Keychain,
//!   Windows Credential Manager, Linux Secret Service).
//! - `InMemoryCredentialStore`: In-memory store for testing.
//!
//! [`resolve_secret_key`] picks the secret for a session from an explicit value,
//! the credential store, or the environment, in that order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::config::ClientConfig;

/// Errors from credential storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential not found for {service}:{account}")]
    NotFound { service: String, account: String },

    #[error("Failed to store credential: {message}")]
    StoreFailed { message: String },

    #[error("Failed to delete credential: {message}")]
    DeleteFailed { message: String },

    #[error("Keyring backend not available: {message}")]
    BackendUnavailable { message: String },

    #[error("No secret key for {account}: set {env_var} or store one in the keyring")]
    Unresolved { account: String, env_var: String },
}

/// Trait for credential storage backends.
pub trait CredentialStore: Send + Sync {
    /// Store the secret key for the given account.
    fn store_key(&self, account: &str, secret_key: &str) -> Result<(), CredentialError>;

    /// Retrieve the secret key for the given account.
    fn get_key(&self, account: &str) -> Result<String, CredentialError>;

    /// Delete the secret key for the given account.
    fn delete_key(&self, account: &str) -> Result<(), CredentialError>;

    /// Check whether a key exists for the given account.
    fn has_key(&self, account: &str) -> bool;
}

/// OS-native credential store using the `keyring` crate.
///
/// Stores credentials under service `"treeschema"` with account names
/// formatted as `"account:{email}"`.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: "treeschema".to_string(),
        }
    }

    /// Format the keyring account name for a given Tree Schema account.
    pub fn account_name(account: &str) -> String {
        format!("account:{account}")
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, &Self::account_name(account)).map_err(|e| {
            CredentialError::BackendUnavailable {
                message: e.to_string(),
            }
        })
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn store_key(&self, account: &str, secret_key: &str) -> Result<(), CredentialError> {
        self.entry(account)?
            .set_password(secret_key)
            .map_err(|e| CredentialError::StoreFailed {
                message: e.to_string(),
            })
    }

    fn get_key(&self, account: &str) -> Result<String, CredentialError> {
        self.entry(account)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => CredentialError::NotFound {
                service: self.service.clone(),
                account: Self::account_name(account),
            },
            other => CredentialError::StoreFailed {
                message: other.to_string(),
            },
        })
    }

    fn delete_key(&self, account: &str) -> Result<(), CredentialError> {
        self.entry(account)?
            .delete_credential()
            .map_err(|e| CredentialError::DeleteFailed {
                message: e.to_string(),
            })
    }

    fn has_key(&self, account: &str) -> bool {
        self.get_key(account).is_ok()
    }
}

/// In-memory credential store for testing.
pub struct InMemoryCredentialStore {
    store: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn store_key(&self, account: &str, secret_key: &str) -> Result<(), CredentialError> {
        let account = KeyringCredentialStore::account_name(account);
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
            .insert(account, secret_key.to_string());
        Ok(())
    }

    fn get_key(&self, account: &str) -> Result<String, CredentialError> {
        let account = KeyringCredentialStore::account_name(account);
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
            .get(&account)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                service: "treeschema".to_string(),
                account,
            })
    }

    fn delete_key(&self, account: &str) -> Result<(), CredentialError> {
        let account = KeyringCredentialStore::account_name(account);
        self.store.lock().unwrap_or_else(PoisonError::into_inner).remove(&account);
        Ok(())
    }

    fn has_key(&self, account: &str) -> bool {
        let account = KeyringCredentialStore::account_name(account);
        self.store.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&account)
    }
}

/// Resolve the secret key for a session.
///
/// Checks, in order: the credential store (when `credential_store_key` is set,
/// falling back to the account e-mail), then the environment variable named by
/// `secret_key_env`.
pub fn resolve_secret_key(
    config: &ClientConfig,
    cred_store: &dyn CredentialStore,
) -> Result<String, CredentialError> {
    let account = config
        .credential_store_key
        .as_deref()
        .unwrap_or(config.email.as_str());
    if !account.is_empty() {
        if let Ok(key) = cred_store.get_key(account) {
            return Ok(key);
        }
    }
    match std::env::var(&config.secret_key_env) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(CredentialError::Unresolved {
            account: config.email.clone(),
            env_var: config.secret_key_env.clone(),
        }),
    }
}
