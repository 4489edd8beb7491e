//! Credential store abstraction
//!
//! Pluggable persistence for tokens and in-flight PKCE state across the
//! redirect round trip. The client is the sole writer; middleware and UI are
//! read-only collaborators. Adapters assume no internal locking contract —
//! the client serializes its own access.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::AuthError;

/// Key under which the pending authorization request is persisted.
pub const PENDING_REQUEST_KEY: &str = "pending_request";

/// Key under which the current token set is persisted.
pub const TOKEN_SET_KEY: &str = "tokens";

/// Capability-set interface for keyed string storage
///
/// Backing media include process memory, encrypted cookies, and platform
/// keychains. Failures surface as [`AuthError::Storage`] and must abort the
/// enclosing operation; they are never silently swallowed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;

    /// Delete a value; deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), AuthError>;

    /// Delete everything this store holds for the client.
    async fn clear(&self) -> Result<(), AuthError>;
}

/// Storage backend selection
#[derive(Debug, Clone)]
pub enum StorageKind {
    /// Process-local map; state does not survive restarts
    Memory,

    /// Platform keychain (macOS Keychain, Windows Credential Manager, Linux
    /// Secret Service) under the given service name
    Keyring { service: String },
}

/// Build the store adapter selected by configuration.
#[must_use]
pub fn create_store(kind: &StorageKind) -> std::sync::Arc<dyn CredentialStore> {
    match kind {
        StorageKind::Memory => std::sync::Arc::new(MemoryStore::new()),
        StorageKind::Keyring { service } => std::sync::Arc::new(KeyringStore::new(service.clone())),
    }
}

/// In-memory reference adapter
///
/// Also the deterministic backend for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Platform keychain adapter backed by the `keyring` crate
///
/// The platform keychain cannot enumerate entries, so the adapter tracks the
/// keys written through this handle; `clear` removes those plus the
/// well-known client keys.
pub struct KeyringStore {
    service: String,
    written: Mutex<BTreeSet<String>>,
}

impl KeyringStore {
    #[must_use]
    pub fn new(service: String) -> Self {
        Self { service, written: Mutex::new(BTreeSet::new()) }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, key).map_err(|e| AuthError::Storage(e.to_string()))
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore").field("service", &self.service).finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entry(key)?.set_password(value).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.written.lock().insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AuthError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                self.written.lock().remove(key);
                Ok(())
            }
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }

    async fn clear(&self) -> Result<(), AuthError> {
        let mut keys: BTreeSet<String> = self.written.lock().clone();
        keys.insert(PENDING_REQUEST_KEY.to_string());
        keys.insert(TOKEN_SET_KEY.to_string());

        for key in keys {
            debug!(key = %key, "clearing keychain entry");
            self.remove(&key).await?;
        }
        Ok(())
    }
}
