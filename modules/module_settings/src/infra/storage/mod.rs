//! Storage backend implementations

pub mod file;
pub mod memory;

pub use file::{FilePlainStore, FileSecretStore, FileStorageProvider};
pub use memory::{MemoryPlainStore, MemorySecretStore, MemoryStorageProvider};
