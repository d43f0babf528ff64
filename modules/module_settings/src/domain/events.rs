//! Change events for settings modules
//!
//! Events are delivered to the module's owner through a [`ChangeListener`]
//! handle acquired at initialize. Sensitive values never appear in events;
//! export is the only path a secret leaves a module.

use crate::contract::SettingValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event types for settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SettingEvent {
    /// A key took a new validated value
    SettingUpdated(SettingUpdatedEvent),
    /// A key was removed from storage and fell back to its default
    SettingRemoved(SettingRemovedEvent),
    /// The module was reset to defaults
    SettingsReset(SettingsResetEvent),
    /// A document was imported
    SettingsImported(SettingsImportedEvent),
}

/// Event data for a value update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingUpdatedEvent {
    /// Module that owns the key
    pub module_id: String,
    /// Setting key
    pub key: String,
    /// New value; `None` when the key is sensitive
    pub value: Option<SettingValue>,
    /// Whether the validator corrected the submitted value
    pub corrected: bool,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
}

/// Event data for a removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRemovedEvent {
    pub module_id: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// Event data for a reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsResetEvent {
    pub module_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Event data for an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsImportedEvent {
    pub module_id: String,
    /// Keys applied by the import
    pub keys: Vec<String>,
    /// Number of rejected entries
    pub failures: usize,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of change notifications, implemented by a module's owner
pub trait ChangeListener: Send + Sync {
    fn on_setting_event(&self, event: &SettingEvent);
}

/// No-op listener for modules without an owner
pub struct NoOpChangeListener;

impl ChangeListener for NoOpChangeListener {
    fn on_setting_event(&self, _event: &SettingEvent) {}
}

impl SettingEvent {
    /// Create a SettingUpdated event, redacting sensitive values
    pub fn updated(
        module_id: &str,
        key: &str,
        value: &SettingValue,
        sensitive: bool,
        corrected: bool,
    ) -> Self {
        SettingEvent::SettingUpdated(SettingUpdatedEvent {
            module_id: module_id.to_string(),
            key: key.to_string(),
            value: (!sensitive).then(|| value.clone()),
            corrected,
            timestamp: Utc::now(),
        })
    }

    pub fn removed(module_id: &str, key: &str) -> Self {
        SettingEvent::SettingRemoved(SettingRemovedEvent {
            module_id: module_id.to_string(),
            key: key.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn reset(module_id: &str) -> Self {
        SettingEvent::SettingsReset(SettingsResetEvent {
            module_id: module_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn imported(module_id: &str, keys: Vec<String>, failures: usize) -> Self {
        SettingEvent::SettingsImported(SettingsImportedEvent {
            module_id: module_id.to_string(),
            keys,
            failures,
            timestamp: Utc::now(),
        })
    }

    /// Module that produced the event
    pub fn module_id(&self) -> &str {
        match self {
            SettingEvent::SettingUpdated(e) => &e.module_id,
            SettingEvent::SettingRemoved(e) => &e.module_id,
            SettingEvent::SettingsReset(e) => &e.module_id,
            SettingEvent::SettingsImported(e) => &e.module_id,
        }
    }
}
