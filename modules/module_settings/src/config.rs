//! Configuration for module settings

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::writer::RetryPolicy;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "MODULE_SETTINGS_";

/// Module settings configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory of the file storage backends
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Key material for the encrypted backend
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Retries for a failed backend write before it is dropped
    #[serde(default = "default_write_retry_attempts")]
    pub write_retry_attempts: u32,

    /// Initial delay between write retries, doubled per attempt
    #[serde(default = "default_write_retry_backoff", with = "humantime_serde")]
    pub write_retry_backoff: Duration,

    /// Accept import keys outside the declared key space (untyped)
    #[serde(default)]
    pub accept_unknown_import_keys: bool,
}

/// Encryption key source. With neither field set the key is derived from
/// the machine identity.
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    /// Base64 master key
    #[serde(default)]
    pub master_key: Option<String>,

    /// Name of an environment variable holding a base64 master key
    #[serde(default)]
    pub master_key_env: Option<String>,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .field("master_key_env", &self.master_key_env)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            encryption: EncryptionConfig::default(),
            write_retry_attempts: default_write_retry_attempts(),
            write_retry_backoff: default_write_retry_backoff(),
            accept_unknown_import_keys: false,
        }
    }
}

impl Config {
    /// Load from an optional YAML file with `MODULE_SETTINGS_*` overrides.
    /// Nested fields use `__`, e.g. `MODULE_SETTINGS_ENCRYPTION__MASTER_KEY_ENV`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.write_retry_attempts,
            backoff: self.write_retry_backoff,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data/settings")
}

fn default_write_retry_attempts() -> u32 {
    3
}

fn default_write_retry_backoff() -> Duration {
    Duration::from_millis(50)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.write_retry_attempts, 3);
        assert_eq!(config.write_retry_backoff, Duration::from_millis(50));
        assert!(!config.accept_unknown_import_keys);
        assert!(config.encryption.master_key.is_none());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "storage_dir: /var/lib/app/settings\nwrite_retry_backoff: 200ms\naccept_unknown_import_keys: true\nencryption:\n  master_key_env: APP_SETTINGS_KEY"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/app/settings"));
        assert_eq!(config.write_retry_backoff, Duration::from_millis(200));
        assert_eq!(config.write_retry_attempts, 3);
        assert!(config.accept_unknown_import_keys);
        assert_eq!(config.encryption.master_key_env.as_deref(), Some("APP_SETTINGS_KEY"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "storage_directory: /tmp").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/settings.yaml"))).is_err());
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let encryption = EncryptionConfig {
            master_key: Some("c2VjcmV0".to_string()),
            master_key_env: None,
        };
        let printed = format!("{:?}", encryption);
        assert!(!printed.contains("c2VjcmV0"));
    }
}
