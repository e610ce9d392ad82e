use std::net::{Ipv4Addr, UdpSocket};

/// Checks whether a UDP port can currently be bound.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes ports with a transient bind on all interfaces.
///
/// The statsd listener aborts if it is asked to bind an occupied port, and
/// other processes on the host may hold any port at any time, so explicitly
/// requested ports are checked here first. The probe socket is dropped before
/// returning.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpPortProbe;

impl PortProbe for UdpPortProbe {
    fn is_free(&self, port: u16) -> bool {
        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("port {} is not bindable: {}", port, err);
                false
            }
        }
    }
}
