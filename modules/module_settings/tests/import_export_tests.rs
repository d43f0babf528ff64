//! Integration tests for import and export documents

use module_settings::contract::*;
use module_settings::Config;
use serde_json::json;

mod common;
use common::{print_test_header, voice_definition, Harness};

fn document(value: serde_json::Value) -> SettingsDocument {
    SettingsDocument::from_json_str(&value.to_string()).unwrap()
}

#[tokio::test]
async fn test_export_without_sensitive_never_contains_sensitive_keys() {
    print_test_header(
        "test_export_without_sensitive_never_contains_sensitive_keys",
        &["on_export(false) omits apiToken; on_export(true) includes it"],
    );

    let harness = Harness::initialized().await;
    assert!(harness.module.set_setting("retryLimit", SettingValue::Int(99)));
    assert!(harness.module.set_setting("apiToken", SettingValue::from("abc123")));

    let public = harness.module.on_export(false);
    for key in voice_definition().sensitive_keys() {
        assert!(!public.contains_key(key));
    }
    assert_eq!(public.get("retryLimit"), Some(&json!(10)));

    let full = harness.module.on_export(true);
    assert_eq!(full.get("apiToken"), Some(&json!("abc123")));
    assert_eq!(full.len(), voice_definition().defaults().len());
}

#[tokio::test]
async fn test_import_skips_sensitive_keys() {
    print_test_header(
        "test_import_skips_sensitive_keys",
        &["Importing {apiToken, retryLimit} applies retryLimit and leaves apiToken untouched"],
    );

    let harness = Harness::initialized().await;
    assert!(harness.module.set_setting("apiToken", SettingValue::from("before")));

    let report = harness
        .module
        .on_import(&document(json!({"apiToken": "xyz", "retryLimit": 5})))
        .unwrap();

    assert_eq!(harness.module.get_setting("retryLimit"), Some(SettingValue::Int(5)));
    assert_eq!(harness.module.get_setting("apiToken"), Some(SettingValue::from("before")));
    assert_eq!(report.applied, vec!["retryLimit".to_string()]);
    assert_eq!(report.skipped_sensitive, vec!["apiToken".to_string()]);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_export_import_round_trip_into_fresh_module() {
    print_test_header(
        "test_export_import_round_trip_into_fresh_module",
        &[
            "A full export imported into a fresh module reproduces every non-sensitive value",
            "Sensitive keys stay at their defaults",
        ],
    );

    let source = Harness::initialized().await;
    source.module.set_setting("retryLimit", SettingValue::Int(7));
    source.module.set_setting("apiToken", SettingValue::from("abc123"));
    source.module.set_setting("enabled", SettingValue::Bool(false));
    source.module.set_setting("timeoutMs", SettingValue::Long(45_000));
    source.module.set_setting("speechRate", SettingValue::Float(0.75));
    source.module.set_setting("language", SettingValue::from("fr-FR"));
    source.module.set_setting("wakeWord", SettingValue::from("jarvis"));

    let exported = source.module.on_export(true);
    let text = exported.to_json_string_pretty().unwrap();
    let parsed = SettingsDocument::from_json_str(&text).unwrap();

    let target = Harness::initialized().await;
    let report = target.module.on_import(&parsed).unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);

    let expected = source.module.get_current_settings();
    let actual = target.module.get_current_settings();
    for (key, value) in &expected {
        if source.module.is_sensitive(key) {
            assert_eq!(actual.get(key), voice_definition().default_of(key));
        } else {
            assert_eq!(actual.get(key), Some(value), "mismatch for {}", key);
        }
    }
}

#[tokio::test]
async fn test_invalid_entries_are_reported_not_fatal() {
    print_test_header(
        "test_invalid_entries_are_reported_not_fatal",
        &["Bad entries become ImportEntryFailure; valid entries still apply"],
    );

    let harness = Harness::initialized().await;
    let report = harness
        .module
        .on_import(&document(json!({
            "retryLimit": 42,
            "language": "xx-XX",
            "enabled": [true],
            "legacyKey": "value",
            "speechRate": "fast",
        })))
        .unwrap();

    assert_eq!(report.applied, vec!["retryLimit".to_string()]);
    let mut failed: Vec<&str> = report.failures.iter().map(|f| f.key.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["enabled", "language", "legacyKey", "speechRate"]);
    assert!(!report.is_clean());

    assert_eq!(harness.module.get_setting("retryLimit"), Some(SettingValue::Int(10)));
    assert_eq!(harness.module.get_setting("language"), Some(SettingValue::from("en-US")));
    assert!(harness.module.get_setting("legacyKey").is_none());
}

#[tokio::test]
async fn test_null_entry_resets_key_to_default() {
    print_test_header(
        "test_null_entry_resets_key_to_default",
        &["A null value resolves to the default and deletes the stored entry"],
    );

    let harness = Harness::initialized().await;
    harness.module.set_setting("retryLimit", SettingValue::Int(8));
    harness.module.flush().await;

    let report = harness
        .module
        .on_import(&document(json!({"retryLimit": null})))
        .unwrap();
    harness.module.flush().await;

    assert_eq!(report.applied, vec!["retryLimit".to_string()]);
    assert_eq!(harness.module.get_setting("retryLimit"), Some(SettingValue::Int(3)));
    assert!(!harness.plain().entries().contains_key("retryLimit"));
}

#[tokio::test]
async fn test_unknown_keys_accepted_when_configured() {
    print_test_header(
        "test_unknown_keys_accepted_when_configured",
        &["accept_unknown_import_keys admits undeclared keys untyped into memory and plaintext"],
    );

    let harness = Harness::with_config(Config {
        accept_unknown_import_keys: true,
        ..Config::default()
    });
    assert!(harness.module.initialize(&harness.ctx()).await);

    let report = harness
        .module
        .on_import(&document(json!({"legacyKey": "value"})))
        .unwrap();
    harness.module.flush().await;

    assert!(report.is_clean());
    assert_eq!(harness.module.get_setting("legacyKey"), Some(SettingValue::from("value")));
    assert_eq!(
        harness.plain().entries().get("legacyKey"),
        Some(&SettingValue::from("value"))
    );
    assert!(harness.module.on_export(false).contains_key("legacyKey"));

    // Survives a reload while the option stays on
    harness.module.cleanup().await;
    assert!(harness.module.initialize(&harness.ctx()).await);
    assert_eq!(harness.module.get_setting("legacyKey"), Some(SettingValue::from("value")));
}

#[test]
fn test_document_must_be_a_flat_object() {
    assert!(matches!(
        SettingsDocument::from_json_str("[1, 2]"),
        Err(SettingsError::Document { .. })
    ));
    assert!(matches!(
        SettingsDocument::from_json_str("{not json"),
        Err(SettingsError::Document { .. })
    ));
}
