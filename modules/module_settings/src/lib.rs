//! Module Settings
//!
//! Typed, validated key/value configuration for application modules.
//! Each module owns a closed key space with declared defaults, persists
//! ordinary keys to a plaintext store and sensitive keys to an encrypted
//! store, and exchanges its values through flat import/export documents.

// Public exports
pub mod contract;
pub use contract::{
    client::SettingsApi, error::SettingsError, ImportEntryFailure, ImportReport, ModuleIdentity,
    SettingValue, SettingsDocument, ValidationResult, ValueKind,
};

pub mod config;
pub use config::Config;

pub mod module;
pub use module::SettingsModule;

pub mod registry;
pub use registry::{ModuleCtx, ModuleRegistry};

pub mod domain;
pub use domain::{
    ChangeListener, Constraint, DefinitionError, ModuleDefinition, SchemaValidator, SettingEvent,
    SettingSpec, Validator,
};

pub mod infra;
