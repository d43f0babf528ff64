//! File-backed storage: one JSON file per namespace
//!
//! The plaintext file keeps typed values. The encrypted file maps opaque
//! storage ids to sealed values, so neither key names nor values are
//! readable without the master key. Every mutation rewrites the file via a
//! temp file and rename.

use crate::contract::SettingValue;
use crate::domain::repository::{PlainStore, SecretStore, StorageProvider};
use crate::infra::crypto::{KeySource, SecretCipher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct StoreFile<V> {
    version: u32,
    entries: BTreeMap<String, V>,
}

#[derive(Debug, Serialize)]
struct StoreFileRef<'a, V> {
    version: u32,
    entries: &'a BTreeMap<String, V>,
}

async fn read_store<V: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, V>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let file: StoreFile<V> = serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt store file {}", path.display()))?;
            if file.version != FORMAT_VERSION {
                anyhow::bail!(
                    "unsupported store version {} in {}",
                    file.version,
                    path.display()
                );
            }
            Ok(file.entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_store<V: Serialize>(path: &Path, entries: &BTreeMap<String, V>) -> Result<()> {
    let file = StoreFileRef {
        version: FORMAT_VERSION,
        entries,
    };
    let bytes = serde_json::to_vec_pretty(&file)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Plaintext store backed by `<root>/<namespace>.json`
#[derive(Debug)]
pub struct FilePlainStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, SettingValue>>,
}

impl FilePlainStore {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let entries = read_store(&path).await?;
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl PlainStore for FilePlainStore {
    async fn load_all(&self) -> Result<BTreeMap<String, SettingValue>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn put(&self, key: &str, value: &SettingValue) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.clone());
        write_store(&self.path, &entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            write_store(&self.path, &entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        write_store(&self.path, &entries).await
    }
}

/// Encrypted store backed by `<root>/<namespace>.json`
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    namespace: String,
    cipher: Arc<SecretCipher>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSecretStore {
    pub async fn open(path: PathBuf, namespace: String, cipher: Arc<SecretCipher>) -> Result<Self> {
        let entries = read_store(&path).await?;
        Ok(Self {
            path,
            namespace,
            cipher,
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let id = self.cipher.storage_id(&self.namespace, key);
        let entries = self.entries.lock().await;
        let Some(sealed) = entries.get(&id) else {
            return Ok(None);
        };
        let value = self.cipher.open(&id, sealed)?;
        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let id = self.cipher.storage_id(&self.namespace, key);
        let sealed = self.cipher.seal(&id, value)?;
        let mut entries = self.entries.lock().await;
        entries.insert(id, sealed);
        write_store(&self.path, &entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let id = self.cipher.storage_id(&self.namespace, key);
        let mut entries = self.entries.lock().await;
        if entries.remove(&id).is_some() {
            write_store(&self.path, &entries).await?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        write_store(&self.path, &entries).await
    }
}

/// Provider storing every namespace as a JSON file under one directory
#[derive(Debug)]
pub struct FileStorageProvider {
    root: PathBuf,
    key_source: KeySource,
    cipher: OnceCell<Arc<SecretCipher>>,
}

impl FileStorageProvider {
    pub fn new(root: impl Into<PathBuf>, key_source: KeySource) -> Self {
        Self {
            root: root.into(),
            key_source,
            cipher: OnceCell::new(),
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(
            config.storage_dir.clone(),
            KeySource::from_config(&config.encryption),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a namespace
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{}.json", namespace))
    }

    async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))
    }

    async fn cipher(&self) -> Result<Arc<SecretCipher>> {
        let cipher = self
            .cipher
            .get_or_try_init(|| async {
                SecretCipher::from_source(&self.key_source).map(Arc::new)
            })
            .await?;
        Ok(cipher.clone())
    }
}

#[async_trait]
impl StorageProvider for FileStorageProvider {
    async fn open_plain(&self, namespace: &str) -> Result<Box<dyn PlainStore>> {
        self.ensure_root().await?;
        let store = FilePlainStore::open(self.path_for(namespace)).await?;
        Ok(Box::new(store))
    }

    async fn open_secret(&self, namespace: &str) -> Result<Box<dyn SecretStore>> {
        self.ensure_root().await?;
        let cipher = self.cipher().await?;
        let store =
            FileSecretStore::open(self.path_for(namespace), namespace.to_string(), cipher).await?;
        Ok(Box::new(store))
    }
}
