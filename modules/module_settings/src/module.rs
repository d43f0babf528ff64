//! Settings module: lifecycle, validation, write-through persistence,
//! import and export
//!
//! A module is usable between `initialize` and `cleanup`. While
//! uninitialized, reads return the declared defaults and mutations are
//! rejected with `SettingsError::NotInitialized`.

use crate::contract::{
    ImportEntryFailure, ImportReport, ModuleIdentity, SettingValue, SettingsApi, SettingsDocument,
    SettingsError, ValidationResult,
};
use crate::domain::events::{ChangeListener, SettingEvent};
use crate::domain::repository::{plain_namespace, secret_namespace};
use crate::domain::router::{StorageRoute, StorageRouter};
use crate::domain::writer::{WriteOp, WriteQueue};
use crate::domain::{ModuleDefinition, SchemaValidator, Validator};
use crate::registry::ModuleCtx;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Runtime bindings held while initialized
struct Binding {
    writer: WriteQueue,
    listener: Weak<dyn ChangeListener>,
    accept_unknown_keys: bool,
}

/// A settings module
pub struct SettingsModule {
    definition: Arc<ModuleDefinition>,
    validator: Arc<dyn Validator>,
    router: StorageRouter,
    values: DashMap<String, SettingValue>,
    state: RwLock<Option<Binding>>,
    lost_writes: Arc<AtomicU64>,
}

impl std::fmt::Debug for SettingsModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsModule")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl SettingsModule {
    /// Module validated by the constraints of its definition
    pub fn new(definition: ModuleDefinition) -> Self {
        let definition = Arc::new(definition);
        let validator = Arc::new(SchemaValidator::new(definition.clone()));
        Self::build(definition, validator)
    }

    /// Module with a custom validator (which may wrap [`SchemaValidator`])
    pub fn with_validator(
        definition: Arc<ModuleDefinition>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self::build(definition, validator)
    }

    fn build(definition: Arc<ModuleDefinition>, validator: Arc<dyn Validator>) -> Self {
        let router = StorageRouter::new(definition.sensitive_keys().clone());
        Self {
            definition,
            validator,
            router,
            values: DashMap::new(),
            state: RwLock::new(None),
            lost_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn module_id(&self) -> &str {
        self.definition.id()
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.router.route(key) == StorageRoute::Encrypted
    }

    /// Backend writes dropped after exhausting retries
    pub fn lost_writes(&self) -> u64 {
        self.lost_writes.load(Ordering::Relaxed)
    }

    // ===== Lifecycle =====

    /// Bind storage and load values.
    ///
    /// Failures are logged and leave the module uninitialized; the return
    /// value mirrors `is_initialized()`.
    pub async fn initialize(&self, ctx: &ModuleCtx) -> bool {
        if self.is_initialized() {
            tracing::debug!(module_id = %self.module_id(), "Module already initialized");
            return true;
        }

        let (binding, loaded) = match self.bind(ctx).await {
            Ok(bound) => bound,
            Err(e) => {
                tracing::warn!(
                    module_id = %self.module_id(),
                    error = %e,
                    "Settings module failed to initialize"
                );
                return false;
            }
        };

        // Values are installed under the lifecycle lock so a losing
        // initialize never touches the live map
        let previous = {
            let mut state = self.state.write();
            if state.is_some() {
                Some(binding)
            } else {
                self.values.clear();
                for (key, value) in loaded {
                    self.values.insert(key, value);
                }
                *state = Some(binding);
                None
            }
        };
        if let Some(duplicate) = previous {
            // Lost an initialize race; the other binding is already live
            duplicate.writer.shutdown().await;
            return true;
        }

        tracing::info!(
            module_id = %self.module_id(),
            keys = self.values.len(),
            "Settings module initialized"
        );
        true
    }

    async fn bind(
        &self,
        ctx: &ModuleCtx,
    ) -> Result<(Binding, BTreeMap<String, SettingValue>), SettingsError> {
        let module_id = self.module_id().to_string();
        let unavailable = |e: anyhow::Error| SettingsError::StorageUnavailable {
            module_id: module_id.clone(),
            reason: format!("{:#}", e),
        };

        let provider = ctx.provider();
        let plain = provider
            .open_plain(&plain_namespace(&module_id))
            .await
            .map_err(&unavailable)?;
        let secret = provider
            .open_secret(&secret_namespace(&module_id))
            .await
            .map_err(&unavailable)?;

        let loaded = self
            .router
            .load(&self.definition, plain.as_ref(), secret.as_ref())
            .await
            .map_err(&unavailable)?;

        let accept_unknown_keys = ctx.config().accept_unknown_import_keys;

        let mut values = self.definition.defaults();
        for (key, stored) in loaded.plain.into_iter().chain(loaded.secret) {
            self.load_stored(&mut values, key, stored, accept_unknown_keys);
        }

        let writer = WriteQueue::spawn(
            module_id,
            self.router.clone(),
            plain,
            secret,
            ctx.config().retry_policy(),
            self.lost_writes.clone(),
        );

        let binding = Binding {
            writer,
            listener: ctx.listener(),
            accept_unknown_keys,
        };
        Ok((binding, values))
    }

    fn load_stored(
        &self,
        values: &mut BTreeMap<String, SettingValue>,
        key: String,
        stored: SettingValue,
        accept_unknown_keys: bool,
    ) {
        if !self.definition.contains_key(&key) {
            if accept_unknown_keys {
                values.insert(key, stored);
            } else {
                tracing::debug!(
                    module_id = %self.module_id(),
                    key = %key,
                    "Skipping stored value for undeclared key"
                );
            }
            return;
        }

        match self.validator.validate(&key, Some(&stored)) {
            ValidationResult::Valid => {
                values.insert(key, stored);
            }
            ValidationResult::Corrected(value) => {
                tracing::debug!(
                    module_id = %self.module_id(),
                    key = %key,
                    "Stored value corrected on load"
                );
                values.insert(key, value);
            }
            ValidationResult::Invalid(reason) => {
                tracing::warn!(
                    module_id = %self.module_id(),
                    key = %key,
                    reason = %reason,
                    "Stored value rejected on load; using default"
                );
            }
        }
    }

    /// Flush pending writes, release storage and the owner handle, and
    /// clear the in-memory values. Idempotent.
    pub async fn cleanup(&self) {
        let binding = {
            let mut state = self.state.write();
            self.values.clear();
            state.take()
        };
        if let Some(binding) = binding {
            binding.writer.shutdown().await;
            tracing::info!(module_id = %self.module_id(), "Settings module cleaned up");
        }
    }

    /// Wait until every backend write submitted so far has been applied
    pub async fn flush(&self) {
        let handle = self
            .state
            .read()
            .as_ref()
            .map(|binding| binding.writer.handle().clone());
        if let Some(handle) = handle {
            handle.flush().await;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    // ===== Reads =====

    pub fn identity(&self) -> &ModuleIdentity {
        self.definition.identity()
    }

    /// Current value of `key`; the declared default while uninitialized
    pub fn get_setting(&self, key: &str) -> Option<SettingValue> {
        // Held across the read so reset and initialize are never observed halfway
        let state = self.state.read();
        if state.is_none() {
            return self.definition.default_of(key).cloned();
        }
        self.values.get(key).map(|value| value.clone())
    }

    /// Copy of the current values; the Defaults Map while uninitialized
    pub fn get_current_settings(&self) -> BTreeMap<String, SettingValue> {
        let state = self.state.read();
        if state.is_none() {
            return self.definition.defaults();
        }
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // ===== Writes =====

    /// Validate and store `value`. Returns `false` when rejected.
    pub fn set_setting(&self, key: &str, value: SettingValue) -> bool {
        match self.try_set_setting(key, Some(value)) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(
                    module_id = %self.module_id(),
                    key = %key,
                    error = %e,
                    "Setting rejected"
                );
                false
            }
        }
    }

    /// Validate and store a value, returning what was stored.
    ///
    /// `None` resolves to the default and deletes the key from its backend.
    pub fn try_set_setting(
        &self,
        key: &str,
        candidate: Option<SettingValue>,
    ) -> Result<SettingValue, SettingsError> {
        let (stored, event, listener) = {
            let state = self.state.read();
            let binding = state.as_ref().ok_or_else(|| self.not_initialized())?;

            if !self.definition.contains_key(key) {
                return Err(SettingsError::UnknownKey {
                    key: key.to_string(),
                });
            }

            let (stored, corrected) = self.accept(key, candidate.as_ref())?;
            let remove = candidate.is_none();
            let changed = self.write_through(binding, key, stored.clone(), remove);

            let event = if remove {
                Some(SettingEvent::removed(self.module_id(), key))
            } else if changed {
                Some(SettingEvent::updated(
                    self.module_id(),
                    key,
                    &stored,
                    self.is_sensitive(key),
                    corrected,
                ))
            } else {
                None
            };
            (stored, event, binding.listener.clone())
        };

        if let Some(event) = event {
            notify(&listener, &event);
        }
        Ok(stored)
    }

    /// Reset a key to its default and delete it from its backend
    pub fn remove_setting(&self, key: &str) -> Result<SettingValue, SettingsError> {
        self.try_set_setting(key, None)
    }

    /// Restore the Defaults Map and clear both backends
    pub fn reset_to_defaults(&self) -> Result<(), SettingsError> {
        let listener = {
            let state = self.state.write();
            let binding = state.as_ref().ok_or_else(|| self.not_initialized())?;

            self.values.clear();
            for (key, value) in self.definition.defaults() {
                self.values.insert(key, value);
            }
            if !binding.writer.handle().submit(WriteOp::Clear) {
                tracing::error!(
                    module_id = %self.module_id(),
                    "Write-through worker is not running"
                );
            }
            binding.listener.clone()
        };

        tracing::info!(module_id = %self.module_id(), "Settings reset to defaults");
        notify(&listener, &SettingEvent::reset(self.module_id()));
        Ok(())
    }

    // ===== Import / export =====

    /// Apply a document.
    ///
    /// Sensitive keys are skipped unconditionally. Every other entry is
    /// validated and applied like `set_setting`; rejected entries are
    /// reported and do not stop the import.
    pub fn on_import(&self, document: &SettingsDocument) -> Result<ImportReport, SettingsError> {
        let mut report = ImportReport::default();

        let listener = {
            let state = self.state.read();
            let binding = state.as_ref().ok_or_else(|| self.not_initialized())?;

            for (key, raw) in document.iter() {
                if self.is_sensitive(key) {
                    report.skipped_sensitive.push(key.clone());
                    continue;
                }

                match self.import_entry(binding, key, raw) {
                    Ok(()) => report.applied.push(key.clone()),
                    Err(reason) => {
                        tracing::warn!(
                            module_id = %self.module_id(),
                            key = %key,
                            reason = %reason,
                            "Import entry rejected"
                        );
                        report.failures.push(ImportEntryFailure {
                            key: key.clone(),
                            reason,
                        });
                    }
                }
            }
            binding.listener.clone()
        };

        tracing::info!(
            module_id = %self.module_id(),
            applied = report.applied.len(),
            skipped_sensitive = report.skipped_sensitive.len(),
            failed = report.failures.len(),
            "Settings imported"
        );
        let event = SettingEvent::imported(
            self.module_id(),
            report.applied.clone(),
            report.failures.len(),
        );
        notify(&listener, &event);
        Ok(report)
    }

    fn import_entry(
        &self,
        binding: &Binding,
        key: &str,
        raw: &serde_json::Value,
    ) -> Result<(), String> {
        let candidate = SettingValue::from_json(raw)?;

        if !self.definition.contains_key(key) {
            if !binding.accept_unknown_keys {
                return Err("unknown key".to_string());
            }
            let value = candidate.ok_or_else(|| "null value for unknown key".to_string())?;
            self.write_through(binding, key, value, false);
            return Ok(());
        }

        let (stored, _) = self
            .accept(key, candidate.as_ref())
            .map_err(|e| e.to_string())?;
        self.write_through(binding, key, stored, candidate.is_none());
        Ok(())
    }

    /// Produce a document of the current values. Sensitive keys are
    /// included only when asked; such output must be treated as secret.
    pub fn on_export(&self, include_sensitive: bool) -> SettingsDocument {
        let mut document = SettingsDocument::new();
        for (key, value) in self.get_current_settings() {
            if !include_sensitive && self.is_sensitive(&key) {
                continue;
            }
            document.insert(key, &value);
        }
        document
    }

    // ===== Helpers =====

    /// Run the validator; returns the value to store and whether it was corrected
    fn accept(
        &self,
        key: &str,
        candidate: Option<&SettingValue>,
    ) -> Result<(SettingValue, bool), SettingsError> {
        match (self.validator.validate(key, candidate), candidate) {
            (ValidationResult::Valid, Some(value)) => Ok((value.clone(), false)),
            (ValidationResult::Valid, None) => self
                .definition
                .default_of(key)
                .cloned()
                .map(|value| (value, true))
                .ok_or_else(|| SettingsError::UnknownKey {
                    key: key.to_string(),
                }),
            (ValidationResult::Corrected(value), _) => Ok((value, true)),
            (ValidationResult::Invalid(message), _) => Err(SettingsError::Validation {
                key: key.to_string(),
                message,
            }),
        }
    }

    /// Update memory and enqueue the backend write while the key's entry is
    /// locked, so backend order per key matches memory order. Returns
    /// whether the in-memory value changed.
    fn write_through(
        &self,
        binding: &Binding,
        key: &str,
        value: SettingValue,
        remove: bool,
    ) -> bool {
        let op = if remove {
            WriteOp::Remove {
                key: key.to_string(),
            }
        } else {
            WriteOp::Put {
                key: key.to_string(),
                value: value.clone(),
            }
        };

        match self.values.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if !remove && *entry.get() == value {
                    return false;
                }
                let changed = *entry.get() != value;
                entry.insert(value);
                self.submit(binding, op);
                changed
            }
            Entry::Vacant(entry) => {
                let _guard = entry.insert(value);
                self.submit(binding, op);
                true
            }
        }
    }

    fn submit(&self, binding: &Binding, op: WriteOp) {
        if !binding.writer.handle().submit(op) {
            tracing::error!(
                module_id = %self.module_id(),
                "Write-through worker is not running"
            );
        }
    }

    fn not_initialized(&self) -> SettingsError {
        SettingsError::NotInitialized {
            module_id: self.module_id().to_string(),
        }
    }
}

fn notify(listener: &Weak<dyn ChangeListener>, event: &SettingEvent) {
    if let Some(listener) = listener.upgrade() {
        listener.on_setting_event(event);
    }
}

impl SettingsApi for SettingsModule {
    fn identity(&self) -> &ModuleIdentity {
        SettingsModule::identity(self)
    }

    fn is_initialized(&self) -> bool {
        SettingsModule::is_initialized(self)
    }

    fn get_setting(&self, key: &str) -> Option<SettingValue> {
        SettingsModule::get_setting(self, key)
    }

    fn set_setting(&self, key: &str, value: SettingValue) -> bool {
        SettingsModule::set_setting(self, key, value)
    }

    fn get_current_settings(&self) -> BTreeMap<String, SettingValue> {
        SettingsModule::get_current_settings(self)
    }

    fn reset_to_defaults(&self) -> Result<(), SettingsError> {
        SettingsModule::reset_to_defaults(self)
    }

    fn on_import(&self, document: &SettingsDocument) -> Result<ImportReport, SettingsError> {
        SettingsModule::on_import(self, document)
    }

    fn on_export(&self, include_sensitive: bool) -> SettingsDocument {
        SettingsModule::on_export(self, include_sensitive)
    }
}
