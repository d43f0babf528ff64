//! End-to-end tests against the file backends

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use module_settings::config::EncryptionConfig;
use module_settings::contract::*;
use module_settings::infra::storage::FileStorageProvider;
use module_settings::{Config, ModuleCtx, SettingsModule};
use std::path::Path;
use std::sync::Arc;

mod common;
use common::{print_test_header, voice_definition, PLAIN_NS, SECRET_NS};

fn config(dir: &Path, key: [u8; 32]) -> Config {
    Config {
        storage_dir: dir.to_path_buf(),
        encryption: EncryptionConfig {
            master_key: Some(BASE64.encode(key)),
            master_key_env: None,
        },
        ..Config::default()
    }
}

fn ctx(config: Config) -> ModuleCtx {
    let provider = Arc::new(FileStorageProvider::from_config(&config));
    ModuleCtx::new(provider, config)
}

#[tokio::test]
async fn test_values_survive_restart() {
    print_test_header(
        "test_values_survive_restart",
        &["Values written through one module instance load into the next"],
    );

    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), [9u8; 32]);

    let module = SettingsModule::new(voice_definition());
    assert!(module.initialize(&ctx(config.clone())).await);
    assert!(module.set_setting("retryLimit", SettingValue::Int(99)));
    assert!(module.set_setting("apiToken", SettingValue::from("abc123")));
    assert!(module.set_setting("speechRate", SettingValue::Float(1.5)));
    module.cleanup().await;

    let restarted = SettingsModule::new(voice_definition());
    assert!(restarted.initialize(&ctx(config)).await);
    assert_eq!(restarted.get_setting("retryLimit"), Some(SettingValue::Int(10)));
    assert_eq!(restarted.get_setting("apiToken"), Some(SettingValue::from("abc123")));
    assert_eq!(restarted.get_setting("speechRate"), Some(SettingValue::Float(1.5)));
    restarted.cleanup().await;
}

#[tokio::test]
async fn test_secrets_are_not_readable_on_disk() {
    print_test_header(
        "test_secrets_are_not_readable_on_disk",
        &["The plaintext file never holds apiToken; the encrypted file hides name and value"],
    );

    let dir = tempfile::tempdir().unwrap();
    let module = SettingsModule::new(voice_definition());
    assert!(module.initialize(&ctx(config(dir.path(), [9u8; 32]))).await);
    module.set_setting("apiToken", SettingValue::from("abc123"));
    module.set_setting("retryLimit", SettingValue::Int(4));
    module.flush().await;

    let plain = std::fs::read_to_string(dir.path().join(format!("{}.json", PLAIN_NS))).unwrap();
    assert!(plain.contains("retryLimit"));
    assert!(!plain.contains("apiToken"));
    assert!(!plain.contains("abc123"));

    let secure = std::fs::read_to_string(dir.path().join(format!("{}.json", SECRET_NS))).unwrap();
    assert!(!secure.contains("apiToken"));
    assert!(!secure.contains("abc123"));
    module.cleanup().await;
}

#[tokio::test]
async fn test_wrong_master_key_falls_back_to_default_secret() {
    print_test_header(
        "test_wrong_master_key_falls_back_to_default_secret",
        &["Secrets sealed under another key are not visible; plaintext values still load"],
    );

    let dir = tempfile::tempdir().unwrap();
    let module = SettingsModule::new(voice_definition());
    assert!(module.initialize(&ctx(config(dir.path(), [9u8; 32]))).await);
    module.set_setting("apiToken", SettingValue::from("abc123"));
    module.set_setting("retryLimit", SettingValue::Int(4));
    module.cleanup().await;

    assert!(module.initialize(&ctx(config(dir.path(), [3u8; 32]))).await);
    assert_eq!(module.get_setting("apiToken"), Some(SettingValue::from("")));
    assert_eq!(module.get_setting("retryLimit"), Some(SettingValue::Int(4)));
    module.cleanup().await;
}

#[tokio::test]
async fn test_missing_key_material_fails_initialize() {
    print_test_header(
        "test_missing_key_material_fails_initialize",
        &["An unset master key variable is an initialization failure"],
    );

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        storage_dir: dir.path().to_path_buf(),
        encryption: EncryptionConfig {
            master_key: None,
            master_key_env: Some("MODULE_SETTINGS_TEST_UNSET_MASTER_KEY".to_string()),
        },
        ..Config::default()
    };

    let module = SettingsModule::new(voice_definition());
    assert!(!module.initialize(&ctx(config)).await);
    assert!(!module.is_initialized());
}

#[tokio::test]
async fn test_reset_empties_both_files() {
    print_test_header(
        "test_reset_empties_both_files",
        &["reset_to_defaults leaves no entries in either namespace"],
    );

    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), [9u8; 32]);
    let module = SettingsModule::new(voice_definition());
    assert!(module.initialize(&ctx(config.clone())).await);
    module.set_setting("apiToken", SettingValue::from("abc123"));
    module.set_setting("language", SettingValue::from("de-DE"));
    module.reset_to_defaults().unwrap();
    module.cleanup().await;

    for ns in [PLAIN_NS, SECRET_NS] {
        let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", ns))).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["entries"], serde_json::json!({}), "{} not empty", ns);
    }

    assert!(module.initialize(&ctx(config)).await);
    assert_eq!(module.get_current_settings(), voice_definition().defaults());
    module.cleanup().await;
}
