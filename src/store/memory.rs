use crate::container::ContainerID;

use super::{ContainerStore, Loaded, PersistedContainer, Result};

/// A store that keeps nothing. Registry state lives in memory only and is
/// lost on restart.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStore;

impl ContainerStore for MemoryStore {
    fn save(&self, _record: &PersistedContainer) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _container_id: &ContainerID) -> Result<()> {
        Ok(())
    }

    fn load_all(&self) -> Result<Loaded> {
        Ok(Loaded::default())
    }

    fn is_durable(&self) -> bool {
        false
    }
}
