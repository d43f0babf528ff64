//! Storage traits for settings persistence
//!
//! These traits define the two backend capabilities a module writes
//! through to. Implementations are in infra/storage.

use crate::contract::SettingValue;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Plaintext backend storing values natively
#[async_trait]
pub trait PlainStore: Send + Sync {
    /// Enumerate every stored entry
    async fn load_all(&self) -> Result<BTreeMap<String, SettingValue>>;

    /// Store a value
    async fn put(&self, key: &str, value: &SettingValue) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry in this namespace
    async fn clear(&self) -> Result<()>;
}

/// Encrypted backend storing string values
///
/// Not enumerable: values are decrypted one key at a time.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read and decrypt a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Encrypt and store a value
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry in this namespace
    async fn clear(&self) -> Result<()>;
}

/// Opens the backend pair for a module
///
/// Each call returns a fresh handle that the module takes ownership of.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn open_plain(&self, namespace: &str) -> Result<Box<dyn PlainStore>>;

    async fn open_secret(&self, namespace: &str) -> Result<Box<dyn SecretStore>>;
}

/// Plaintext namespace for a module
pub fn plain_namespace(module_id: &str) -> String {
    format!("{}.settings", module_id)
}

/// Encrypted namespace for a module
pub fn secret_namespace(module_id: &str) -> String {
    format!("{}.secure", module_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_do_not_collide() {
        assert_ne!(plain_namespace("voice"), secret_namespace("voice"));
        assert_ne!(plain_namespace("voice.secure"), secret_namespace("voice"));
        assert_ne!(secret_namespace("voice.settings"), plain_namespace("voice"));
    }
}
