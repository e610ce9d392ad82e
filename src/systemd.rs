//! Socket activation: sockets passed in by systemd via `LISTEN_FDS`.
use std::ffi::OsString;
use std::io;
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};

/// First file descriptor passed by systemd.
const LISTEN_FDS_START: RawFd = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no sockets were passed by systemd")]
    NotActivated,
    #[error("`{name}` has invalid value `{value}`")]
    InvalidVar { name: &'static str, value: String },
    #[error("no systemd socket named `{0}`")]
    NotFound(String),
    #[error("systemd socket `{name}` is unusable: {source}")]
    Socket {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A named socket passed in by systemd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassedFd {
    pub fd: RawFd,
    pub name: String,
}

/// Lists the sockets passed to process `pid`, reading variables from `lookup`.
///
/// Sockets without a name in `LISTEN_FDNAMES` are named `unknown`.
pub fn passed_fds(lookup: impl Fn(&str) -> Option<OsString>, pid: u32) -> Result<Vec<PassedFd>> {
    let var = |name: &'static str| lookup(name).map(|v| v.to_string_lossy().into_owned());

    let listen_pid = var("LISTEN_PID").ok_or(Error::NotActivated)?;
    let listen_pid = listen_pid
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::InvalidVar {
            name: "LISTEN_PID",
            value: listen_pid.clone(),
        })?;
    if listen_pid != pid {
        log::debug!("LISTEN_PID {} is not this process ({})", listen_pid, pid);
        return Err(Error::NotActivated);
    }

    let listen_fds = var("LISTEN_FDS").ok_or(Error::NotActivated)?;
    let count = listen_fds
        .trim()
        .parse::<RawFd>()
        .map_err(|_| Error::InvalidVar {
            name: "LISTEN_FDS",
            value: listen_fds.clone(),
        })?;

    let names = var("LISTEN_FDNAMES").unwrap_or_default();
    let mut names = names.split(':');
    Ok((0..count)
        .map(|offset| PassedFd {
            fd: LISTEN_FDS_START + offset,
            name: names
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("unknown")
                .to_owned(),
        })
        .collect())
}

/// A socket listener taken over from systemd.
#[derive(Debug)]
pub enum ActivatedListener {
    Tcp(std::net::TcpListener),
    Unix(std::os::unix::net::UnixListener),
}

/// Takes ownership of the socket passed by systemd under `name`.
pub fn take_listener(name: &str) -> Result<ActivatedListener> {
    let passed = passed_fds(|var| std::env::var_os(var), std::process::id())?;
    let fd = passed
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.fd)
        .ok_or_else(|| Error::NotFound(name.to_owned()))?;

    // SAFETY: the fd was handed to this process by systemd and is claimed once.
    let tcp = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    let listener = if tcp.local_addr().is_ok() {
        ActivatedListener::Tcp(tcp)
    } else {
        let fd = tcp.into_raw_fd();
        // SAFETY: ownership moves back out of the TcpListener above.
        ActivatedListener::Unix(unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) })
    };
    let nonblocking = match &listener {
        ActivatedListener::Tcp(l) => l.set_nonblocking(true),
        ActivatedListener::Unix(l) => l.set_nonblocking(true),
    };
    nonblocking.map_err(|source| Error::Socket {
        name: name.to_owned(),
        source,
    })?;
    log::info!("using systemd socket `{}` (fd {})", name, fd);

    Ok(listener)
}
