use crate::container::{Container, ContainerID};

/// The on-disk projection of a registered container.
///
/// Listeners are never persisted; they are recreated from `statsd_port` when
/// the record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PersistedContainer {
    pub container_id: ContainerID,
    #[serde(default)]
    pub statsd_host: String,
    #[serde(default)]
    pub statsd_port: u16,
}

impl From<&Container> for PersistedContainer {
    fn from(value: &Container) -> Self {
        Self {
            container_id: value.id().clone(),
            statsd_host: value.host().to_owned(),
            statsd_port: value.port(),
        }
    }
}
