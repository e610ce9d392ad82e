use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listener was already started")]
    AlreadyStarted,
    #[error("listener was stopped and cannot be restarted")]
    Stopped,
    #[error("failed to collect metrics: {0}")]
    Collect(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to start listener: {0}")]
    Start(#[source] Error),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("listener exited before announcing its address")]
    Aborted,
    #[error("listener did not announce a bound address within {0:?}")]
    Timeout(Duration),
}
