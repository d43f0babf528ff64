//! Common test utilities and the shared voice module fixture
#![allow(dead_code)]

use module_settings::infra::storage::{MemoryPlainStore, MemorySecretStore, MemoryStorageProvider};
use module_settings::{Config, ModuleCtx, ModuleDefinition, SettingSpec, SettingsModule};
use std::sync::Arc;

pub const MODULE_ID: &str = "voice";
pub const PLAIN_NS: &str = "voice.settings";
pub const SECRET_NS: &str = "voice.secure";

/// Voice assistant module: `retryLimit` bounded to [1, 10], `apiToken`
/// sensitive, plus one key of every other kind.
pub fn voice_definition() -> ModuleDefinition {
    ModuleDefinition::builder(MODULE_ID, "Voice Assistant", "assistant")
        .setting("retryLimit", SettingSpec::int(3).range(1, 10))
        .setting("apiToken", SettingSpec::string("").sensitive())
        .setting("enabled", SettingSpec::bool(true))
        .setting("timeoutMs", SettingSpec::long(30_000).range(100, 600_000))
        .setting("speechRate", SettingSpec::float(1.0).float_range(0.5, 2.0))
        .setting(
            "language",
            SettingSpec::string("en-US").one_of(["en-US", "de-DE", "fr-FR"]),
        )
        .setting("wakeWord", SettingSpec::string("hey").max_len(16))
        .build()
        .expect("voice definition is valid")
}

/// Memory-backed harness around one module
pub struct Harness {
    pub provider: Arc<MemoryStorageProvider>,
    pub module: Arc<SettingsModule>,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            provider: Arc::new(MemoryStorageProvider::new()),
            module: Arc::new(SettingsModule::new(voice_definition())),
            config,
        }
    }

    pub fn ctx(&self) -> ModuleCtx {
        ModuleCtx::new(self.provider.clone(), self.config.clone())
    }

    /// Harness with an initialized module
    pub async fn initialized() -> Self {
        let harness = Self::new();
        assert!(harness.module.initialize(&harness.ctx()).await);
        harness
    }

    pub fn plain(&self) -> MemoryPlainStore {
        self.provider.plain(PLAIN_NS)
    }

    pub fn secret(&self) -> MemorySecretStore {
        self.provider.secret(SECRET_NS)
    }
}

pub fn print_test_header(test_name: &str, purpose: &[&str]) {
    println!("\n🧪 TEST: {}", test_name);
    if let Some(first) = purpose.first() {
        println!("📋 PURPOSE: {}", first);
    }
    for line in purpose.iter().skip(1) {
        println!("   {}", line);
    }
}
