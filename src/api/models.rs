use crate::container::Container;

/// Body of `POST /container`.
#[derive(Debug, serde::Deserialize)]
pub struct AddContainerRequest {
    pub container_id: String,
    #[serde(default)]
    pub statsd_host: String,
    #[serde(default)]
    pub statsd_port: u16,
}

#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContainerResponse {
    pub container_id: String,
    pub statsd_host: String,
    pub statsd_port: u16,
}

impl From<&Container> for ContainerResponse {
    fn from(value: &Container) -> Self {
        Self {
            container_id: value.id().to_string(),
            statsd_host: value.host().to_owned(),
            statsd_port: value.port(),
        }
    }
}
