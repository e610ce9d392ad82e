use std::net::SocketAddr;
use std::time::Duration;

use crate::container::ContainerID;

use super::{Listener, ListenerFactory, ProvisionError};

/// A started listener together with the address it bound.
pub struct Provisioned {
    pub listener: Box<dyn Listener>,
    pub address: SocketAddr,
}

/// Starts and stops listeners on behalf of the registry.
pub struct Provisioner {
    factory: Box<dyn ListenerFactory>,
    announce_timeout: Duration,
}

impl Provisioner {
    /// Creates a provisioner that waits at most `announce_timeout` for a started
    /// listener to publish its bound address.
    pub fn new(factory: impl ListenerFactory + 'static, announce_timeout: Duration) -> Self {
        Self {
            factory: Box::new(factory),
            announce_timeout,
        }
    }

    /// Creates and starts a listener for `port`, `0` requesting any free port.
    ///
    /// Explicit ports must have been probed by the caller; this method does not
    /// check whether the port is in use.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::Start`] if the listener refuses to start.
    /// - [`ProvisionError::Bind`] if the listener reports a bind failure.
    /// - [`ProvisionError::Aborted`] if the listener exits without announcing.
    /// - [`ProvisionError::Timeout`] if no address is announced in time.
    ///
    /// On error the listener has already been stopped.
    pub async fn provision(
        &self,
        container_id: &ContainerID,
        port: u16,
    ) -> Result<Provisioned, ProvisionError> {
        let listener = self.factory.create(port);
        let announcement = match listener.start() {
            Ok(announcement) => announcement,
            Err(source) => {
                listener.stop().await;
                return Err(ProvisionError::Start(source));
            }
        };

        let err = match tokio::time::timeout(self.announce_timeout, announcement).await {
            Ok(Ok(Ok(address))) => {
                log::debug!(
                    "listener for container `{}` bound {}",
                    container_id,
                    address
                );
                return Ok(Provisioned { listener, address });
            }
            Ok(Ok(Err(source))) => ProvisionError::Bind(source),
            Ok(Err(_)) => ProvisionError::Aborted,
            Err(_) => ProvisionError::Timeout(self.announce_timeout),
        };

        log::error!(
            "could not provision listener for container `{}`: {}",
            container_id,
            err
        );
        listener.stop().await;
        Err(err)
    }

    /// Stops a listener and releases its socket.
    pub async fn terminate(&self, container_id: &ContainerID, listener: &dyn Listener) {
        listener.stop().await;
        log::debug!("stopped listener for container `{}`", container_id);
    }
}
