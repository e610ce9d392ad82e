use std::time::Duration;

use crate::container::ContainerID;
use crate::listener::ProvisionError;
use crate::store;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not start server on occupied port {0}")]
    PortInUse(u16),
    #[error("failed to provision listener for container `{container_id}`: {source}")]
    ProvisionFailed {
        container_id: ContainerID,
        #[source]
        source: ProvisionError,
    },
    #[error("listener for container `{container_id}` did not report its port within {timeout:?}")]
    ProvisionTimeout {
        container_id: ContainerID,
        timeout: Duration,
    },
    #[error("failed to persist container `{container_id}`: {source}")]
    PersistFailed {
        container_id: ContainerID,
        #[source]
        source: store::Error,
    },
    #[error("container `{0}` not found")]
    NotFound(ContainerID),
    #[error("failed to delete persisted container `{container_id}`: {source}")]
    DeleteFailed {
        container_id: ContainerID,
        #[source]
        source: store::Error,
    },
    #[error("failed to load persisted containers: {0}")]
    Load(#[source] store::Error),
    #[error("registry is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, Error>;
