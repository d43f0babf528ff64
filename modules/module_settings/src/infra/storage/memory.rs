//! In-process storage backends
//!
//! Stores are shared handles: the provider keeps one per namespace so a
//! module can be re-initialized against the same data and tests can inspect
//! what was written. `MemorySecretStore` does not encrypt.

use crate::contract::SettingValue;
use crate::domain::repository::{PlainStore, SecretStore, StorageProvider};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Failure injection shared by the memory stores
#[derive(Debug, Clone, Default)]
struct FailureInjector {
    remaining: Arc<AtomicU32>,
}

impl FailureInjector {
    fn arm(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self, op: &str) -> Result<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            bail!("injected failure during {}", op);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPlainStore {
    entries: Arc<RwLock<BTreeMap<String, SettingValue>>>,
    failures: FailureInjector,
}

impl MemoryPlainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored entries
    pub fn entries(&self) -> BTreeMap<String, SettingValue> {
        self.entries.read().clone()
    }

    /// Fail the next `count` mutating operations
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.arm(count);
    }
}

#[async_trait]
impl PlainStore for MemoryPlainStore {
    async fn load_all(&self) -> Result<BTreeMap<String, SettingValue>> {
        Ok(self.entries.read().clone())
    }

    async fn put(&self, key: &str, value: &SettingValue) -> Result<()> {
        self.failures.check("put")?;
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.failures.check("remove")?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.failures.check("clear")?;
        self.entries.write().clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    reads: Arc<Mutex<Vec<String>>>,
    failures: FailureInjector,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored string for a key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys passed to `get`, in call order
    pub fn read_log(&self) -> Vec<String> {
        self.reads.lock().clone()
    }

    /// Fail the next `count` mutating operations
    pub fn fail_next_writes(&self, count: u32) {
        self.failures.arm(count);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.reads.lock().push(key.to_string());
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.failures.check("put")?;
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.failures.check("remove")?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.failures.check("clear")?;
        self.entries.write().clear();
        Ok(())
    }
}

/// Provider handing out shared memory stores per namespace
#[derive(Debug, Default)]
pub struct MemoryStorageProvider {
    plain: DashMap<String, MemoryPlainStore>,
    secret: DashMap<String, MemorySecretStore>,
    fail_open: AtomicBool,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent open fail (e.g. encryption key unavailable)
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Plaintext store for a namespace, created on demand
    pub fn plain(&self, namespace: &str) -> MemoryPlainStore {
        self.plain
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Encrypted store for a namespace, created on demand
    pub fn secret(&self, namespace: &str) -> MemorySecretStore {
        self.secret
            .entry(namespace.to_string())
            .or_default()
            .value()
            .clone()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn open_plain(&self, namespace: &str) -> Result<Box<dyn PlainStore>> {
        if self.fail_open.load(Ordering::SeqCst) {
            bail!("plaintext store '{}' unavailable", namespace);
        }
        Ok(Box::new(self.plain(namespace)))
    }

    async fn open_secret(&self, namespace: &str) -> Result<Box<dyn SecretStore>> {
        if self.fail_open.load(Ordering::SeqCst) {
            bail!("encrypted store '{}' unavailable", namespace);
        }
        Ok(Box::new(self.secret(namespace)))
    }
}
