//! Lifecycle of the per-container metrics listeners.
//!
//! A [`Listener`] is the capability that actually receives application metrics
//! on a UDP port. This module owns the pieces around it that the registry
//! composes:
//!
//! - [`PortProbe`] checks whether an explicitly requested port is free before
//!   any listener is asked to bind it.
//! - [`Provisioner`] creates and starts listeners, waits for them to announce
//!   the address they bound, and stops them again.
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::accumulator::Accumulator;

mod error;
mod probe;
mod provision;

pub use error::{Error, ProvisionError, Result};
pub use probe::{PortProbe, UdpPortProbe};
pub use provision::{Provisioned, Provisioner};

/// Receives the address a started listener bound, or the error that kept it
/// from binding.
pub type Announcement = oneshot::Receiver<io::Result<SocketAddr>>;

/// Future returned by [`Listener::stop`].
pub type StopFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A metrics listener bound to one UDP port.
pub trait Listener: Send + Sync {
    /// Starts the listener in the background.
    ///
    /// The bound address is published exactly once through the returned
    /// [`Announcement`]. Must be called from within a tokio runtime.
    fn start(&self) -> Result<Announcement>;

    /// Drains every metric buffered since the previous call into `acc`.
    fn collect(&self, acc: &dyn Accumulator) -> Result<()>;

    /// Stops the listener. The socket is released once the future resolves.
    ///
    /// Stopping a listener that was never started or is already stopped is a
    /// no-op.
    fn stop(&self) -> StopFuture<'_>;
}

/// Creates unstarted listeners for a requested port, `0` meaning any port.
pub trait ListenerFactory: Send + Sync {
    fn create(&self, port: u16) -> Box<dyn Listener>;
}
