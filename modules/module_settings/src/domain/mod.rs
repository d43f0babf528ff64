//! Domain layer - validation, routing and write-through persistence

pub mod definition;
pub mod events;
pub mod repository;
pub mod router;
pub mod validation;
pub mod writer;

pub use definition::{
    Constraint, DefinitionError, ModuleDefinition, ModuleDefinitionBuilder, SettingSpec,
};
pub use events::{ChangeListener, NoOpChangeListener, SettingEvent};
pub use repository::{PlainStore, SecretStore, StorageProvider};
pub use router::{StorageRoute, StorageRouter};
pub use validation::{SchemaValidator, Validator};
