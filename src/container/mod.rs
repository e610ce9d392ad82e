use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::listener::Listener;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// A validated container identifier.
///
/// Container ids double as file names in the containers directory, so besides
/// the length limit they must not contain path separators or NUL bytes and
/// must not be `.` or `..`.
///
/// # Examples
///
/// ```
/// # use statsd_manager::container::{ContainerID, Error};
/// let container_id = ContainerID::new("abc123").unwrap();
/// assert_eq!(container_id.as_ref(), "abc123");
/// assert!(ContainerID::new("../etc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty, exceeds
    /// [`CONTAINER_ID_MAX_LEN`], or cannot be used as a file name.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty()
            || src.len() > CONTAINER_ID_MAX_LEN
            || src == "."
            || src == ".."
            || src.contains(['/', '\0'])
        {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_arc(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }
}

impl FromStr for ContainerID {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContainerID {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl serde::Serialize for ContainerID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered container and the statsd listener that serves it.
///
/// The listener is owned exclusively by this record. Snapshots share the
/// record through an [`Arc`], never the listener itself.
pub struct Container {
    id: ContainerID,
    host: String,
    port: u16,
    listener: Box<dyn Listener>,
}

impl Container {
    pub(crate) fn new(id: ContainerID, host: String, port: u16, listener: Box<dyn Listener>) -> Self {
        Self {
            id,
            host,
            port,
            listener,
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    /// The advertised host of the container's statsd endpoint.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The bound port of the container's statsd endpoint. Never `0`.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn listener(&self) -> &dyn Listener {
        self.listener.as_ref()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
