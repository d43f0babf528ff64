//! Module registry and initialization context

use crate::config::Config;
use crate::contract::SettingsError;
use crate::domain::events::{ChangeListener, NoOpChangeListener, SettingEvent};
use crate::domain::repository::StorageProvider;
use crate::module::SettingsModule;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a module needs to bind at initialization
#[derive(Clone)]
pub struct ModuleCtx {
    provider: Arc<dyn StorageProvider>,
    listener: Weak<dyn ChangeListener>,
    config: Config,
}

impl ModuleCtx {
    pub fn new(provider: Arc<dyn StorageProvider>, config: Config) -> Self {
        let listener: Weak<dyn ChangeListener> = Weak::<NoOpChangeListener>::new();
        Self {
            provider,
            listener,
            config,
        }
    }

    /// Notify `listener` of changes. Only a weak handle is kept, so the
    /// module never keeps its owner alive.
    pub fn with_listener(mut self, listener: &Arc<dyn ChangeListener>) -> Self {
        self.listener = Arc::downgrade(listener);
        self
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    pub fn listener(&self) -> Weak<dyn ChangeListener> {
        self.listener.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Owner of a set of settings modules.
///
/// Forwards every module change event to broadcast subscribers.
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<SettingsModule>>,
    events: broadcast::Sender<SettingEvent>,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            modules: DashMap::new(),
            events,
        })
    }

    /// Add a module; ids are unique within a registry
    pub fn register(&self, module: SettingsModule) -> Result<Arc<SettingsModule>, SettingsError> {
        let module_id = module.module_id().to_string();
        match self.modules.entry(module_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SettingsError::AlreadyRegistered { module_id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let module = Arc::new(module);
                slot.insert(module.clone());
                tracing::debug!(module_id = %module_id, "Settings module registered");
                Ok(module)
            }
        }
    }

    pub fn get(&self, module_id: &str) -> Result<Arc<SettingsModule>, SettingsError> {
        self.modules
            .get(module_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SettingsError::ModuleNotFound {
                module_id: module_id.to_string(),
            })
    }

    /// Registered ids, sorted
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingEvent> {
        self.events.subscribe()
    }

    /// Initialize every registered module against `provider`, with this
    /// registry as the change listener. Returns ids that failed.
    pub async fn initialize_all(
        self: &Arc<Self>,
        provider: Arc<dyn StorageProvider>,
        config: Config,
    ) -> Vec<String> {
        let listener: Arc<dyn ChangeListener> = self.clone();
        let ctx = ModuleCtx::new(provider, config).with_listener(&listener);

        let mut failed = Vec::new();
        for module_id in self.module_ids() {
            let Ok(module) = self.get(&module_id) else {
                continue;
            };
            if !module.initialize(&ctx).await {
                failed.push(module_id);
            }
        }

        tracing::info!(
            total = self.modules.len(),
            failed = failed.len(),
            "Settings modules initialized"
        );
        failed
    }

    /// Clean up and drop a module
    pub async fn unregister(&self, module_id: &str) -> Result<(), SettingsError> {
        let (_, module) =
            self.modules
                .remove(module_id)
                .ok_or_else(|| SettingsError::ModuleNotFound {
                    module_id: module_id.to_string(),
                })?;
        module.cleanup().await;
        Ok(())
    }

    /// Clean up every module, flushing pending writes
    pub async fn shutdown(&self) {
        for module_id in self.module_ids() {
            if let Ok(module) = self.get(&module_id) {
                module.cleanup().await;
            }
        }
        tracing::info!("Settings modules shut down");
    }
}

impl ChangeListener for ModuleRegistry {
    fn on_setting_event(&self, event: &SettingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event.clone());
    }
}
