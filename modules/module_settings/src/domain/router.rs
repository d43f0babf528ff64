//! Storage routing between the plaintext and encrypted backends

use crate::contract::SettingValue;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::definition::ModuleDefinition;
use super::repository::{PlainStore, SecretStore};

/// Backend owning a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRoute {
    Plaintext,
    Encrypted,
}

/// Raw values read from both backends at load time, not yet validated
#[derive(Debug, Default)]
pub struct LoadedValues {
    pub plain: BTreeMap<String, SettingValue>,
    pub secret: BTreeMap<String, SettingValue>,
}

/// Routes keys to backends by membership in the sensitive-key set
#[derive(Debug, Clone)]
pub struct StorageRouter {
    sensitive: Arc<BTreeSet<String>>,
}

impl StorageRouter {
    pub fn new(sensitive: BTreeSet<String>) -> Self {
        Self {
            sensitive: Arc::new(sensitive),
        }
    }

    pub fn route(&self, key: &str) -> StorageRoute {
        if self.sensitive.contains(key) {
            StorageRoute::Encrypted
        } else {
            StorageRoute::Plaintext
        }
    }

    /// Write a value to its owning backend
    pub async fn put(
        &self,
        plain: &dyn PlainStore,
        secret: &dyn SecretStore,
        key: &str,
        value: &SettingValue,
    ) -> Result<()> {
        match self.route(key) {
            StorageRoute::Plaintext => plain.put(key, value).await,
            StorageRoute::Encrypted => secret.put(key, &value.to_storage_string()).await,
        }
    }

    /// Delete a value from its owning backend
    pub async fn remove(
        &self,
        plain: &dyn PlainStore,
        secret: &dyn SecretStore,
        key: &str,
    ) -> Result<()> {
        match self.route(key) {
            StorageRoute::Plaintext => plain.remove(key).await,
            StorageRoute::Encrypted => secret.remove(key).await,
        }
    }

    /// Read stored values for the load sequence.
    ///
    /// The plaintext backend is enumerated wholesale; the encrypted backend
    /// is only asked for declared sensitive keys. A failure to enumerate
    /// the plaintext backend fails the load. A secret that cannot be
    /// decrypted or parsed is skipped so the key keeps its default.
    pub async fn load(
        &self,
        definition: &ModuleDefinition,
        plain: &dyn PlainStore,
        secret: &dyn SecretStore,
    ) -> Result<LoadedValues> {
        let mut loaded = LoadedValues::default();

        for (key, value) in plain.load_all().await? {
            if self.route(&key) == StorageRoute::Encrypted {
                tracing::warn!(
                    module_id = %definition.id(),
                    key = %key,
                    "Ignoring sensitive key found in plaintext store"
                );
                continue;
            }
            loaded.plain.insert(key, value);
        }

        for key in self.sensitive.iter() {
            let Some(kind) = definition.spec(key).map(|spec| spec.kind()) else {
                continue;
            };
            match secret.get(key).await {
                Ok(Some(raw)) => match SettingValue::parse_as(kind, &raw) {
                    Some(value) => {
                        loaded.secret.insert(key.clone(), value);
                    }
                    None => tracing::warn!(
                        module_id = %definition.id(),
                        key = %key,
                        expected = %kind,
                        "Stored secret does not parse as the declared type; using default"
                    ),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    module_id = %definition.id(),
                    key = %key,
                    error = %e,
                    "Failed to read secret; using default"
                ),
            }
        }

        Ok(loaded)
    }
}
