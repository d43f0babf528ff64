//! Client trait for callers of a settings module
//!
//! UI widgets, background import/export jobs and network callbacks hold an
//! `Arc<dyn SettingsApi>` and never touch storage directly.

use super::{
    error::SettingsError,
    model::{ImportReport, ModuleIdentity, SettingValue, SettingsDocument},
};
use std::collections::BTreeMap;

/// Settings API exposed by every module
pub trait SettingsApi: Send + Sync {
    /// Module identity (id, name, category)
    fn identity(&self) -> &ModuleIdentity;

    /// Whether the module is bound to storage
    fn is_initialized(&self) -> bool;

    /// Current in-memory value of a key
    fn get_setting(&self, key: &str) -> Option<SettingValue>;

    /// Validate and store a value; `false` when rejected
    fn set_setting(&self, key: &str, value: SettingValue) -> bool;

    /// Snapshot of all current values
    fn get_current_settings(&self) -> BTreeMap<String, SettingValue>;

    /// Restore defaults and clear both backends
    fn reset_to_defaults(&self) -> Result<(), SettingsError>;

    /// Apply a document, skipping sensitive keys
    fn on_import(&self, document: &SettingsDocument) -> Result<ImportReport, SettingsError>;

    /// Produce a document of the current values
    fn on_export(&self, include_sensitive: bool) -> SettingsDocument;
}
