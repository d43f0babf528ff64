//! Contract error types for module settings
//!
//! None of these are fatal to the process; the module degrades to its best
//! available in-memory state and reports the failure to the caller.

/// Settings module errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// Operation requires an initialized module
    #[error("Module '{module_id}' is not initialized")]
    NotInitialized { module_id: String },

    /// A storage backend could not be opened or loaded
    #[error("Storage unavailable for module '{module_id}': {reason}")]
    StorageUnavailable { module_id: String, reason: String },

    /// Key is outside the module's declared key space
    #[error("Unknown setting key: {key}")]
    UnknownKey { key: String },

    /// Candidate value rejected with no correction available
    #[error("Validation error for '{key}': {message}")]
    Validation { key: String, message: String },

    /// Import/export document is malformed as a whole
    #[error("Invalid settings document: {message}")]
    Document { message: String },

    /// Backend operation failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// A module with this id is already registered
    #[error("Module already registered: {module_id}")]
    AlreadyRegistered { module_id: String },

    /// No module with this id is registered
    #[error("Module not found: {module_id}")]
    ModuleNotFound { module_id: String },
}
