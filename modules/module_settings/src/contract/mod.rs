//! Contract layer - public API shared by modules and their callers
//!
//! This layer contains the value model, the import/export document and the
//! client trait UI and background callers program against.

pub mod client;
pub mod error;
pub mod model;

pub use client::SettingsApi;
pub use error::SettingsError;
pub use model::{
    ImportEntryFailure, ImportReport, ModuleIdentity, SettingValue, SettingsDocument,
    ValidationResult, ValueKind,
};
