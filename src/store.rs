//! Durable container state.
//!
//! Every registered container is projected to one record on disk so that the
//! registry can recreate its listeners after a restart.
mod directory;
mod error;
mod memory;
mod models;

pub use directory::DirectoryStore;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use models::PersistedContainer;

use crate::container::ContainerID;

/// Outcome of enumerating a store.
#[derive(Debug, Default)]
pub struct Loaded {
    pub records: Vec<PersistedContainer>,
    /// Entries that could not be read or decoded. They are skipped.
    pub errors: Vec<Error>,
}

pub trait ContainerStore: Send + Sync {
    /// Writes or overwrites the record for `record.container_id`.
    fn save(&self, record: &PersistedContainer) -> Result<()>;

    /// Removes the record for `container_id`. A missing record is not an error.
    fn delete(&self, container_id: &ContainerID) -> Result<()>;

    /// Enumerates every stored record.
    ///
    /// # Errors
    ///
    /// Fails only if the store as a whole is unreadable. Individual bad
    /// entries are reported in [`Loaded::errors`].
    fn load_all(&self) -> Result<Loaded>;

    /// Whether saved records survive a process restart.
    fn is_durable(&self) -> bool;
}
