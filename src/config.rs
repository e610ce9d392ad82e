//! Startup configuration read from environment variables.
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_LISTEN: &str = "0.0.0.0:8888";
pub const DEFAULT_CONTAINERS_DIR: &str = "/run/statsd-manager/containers";
pub const DEFAULT_STATSD_HOST: &str = "198.51.100.1";
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ANNOUNCE_TIMEOUT: Duration = Duration::from_millis(1000);
const DEFAULT_GATHER_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("environment variable `{name}` is not valid unicode")]
    NotUnicode { name: &'static str },
    #[error("environment variable `{name}` has invalid value `{value}`: {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("environment variable `{name}` must be greater than zero")]
    Zero { name: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where the control API accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiListen {
    Tcp(String),
    Unix(PathBuf),
    /// A pre-bound socket handed over by systemd, looked up by name.
    Systemd(String),
}

impl ApiListen {
    /// Interprets a listen value: anything containing `:` is a TCP address,
    /// everything else a Unix socket path.
    pub fn parse(value: &str) -> Self {
        if value.contains(':') {
            Self::Tcp(value.to_owned())
        } else {
            Self::Unix(PathBuf::from(value))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_listen: ApiListen,
    /// `None` keeps all state in memory.
    pub containers_dir: Option<PathBuf>,
    pub api_timeout: Duration,
    pub statsd_host: String,
    pub announce_timeout: Duration,
    pub gather_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_listen: ApiListen::parse(DEFAULT_API_LISTEN),
            containers_dir: Some(PathBuf::from(DEFAULT_CONTAINERS_DIR)),
            api_timeout: DEFAULT_API_TIMEOUT,
            statsd_host: DEFAULT_STATSD_HOST.to_owned(),
            announce_timeout: DEFAULT_ANNOUNCE_TIMEOUT,
            gather_interval: DEFAULT_GATHER_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Builds the configuration from `lookup`, falling back to defaults for
    /// every unset variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let var = |name: &'static str| -> Result<Option<String>> {
            lookup(name)
                .map(|value| value.into_string().map_err(|_| Error::NotUnicode { name }))
                .transpose()
        };
        let mut config = Self::default();

        if let Some(name) = var("STATSD_SYSTEMD_SOCKET_NAME")?.filter(|n| !n.is_empty()) {
            config.api_listen = ApiListen::Systemd(name);
        } else if let Some(listen) = var("STATSD_API_LISTEN")?.filter(|l| !l.is_empty()) {
            config.api_listen = ApiListen::parse(&listen);
        }

        if let Some(dir) = var("STATSD_CONTAINERS_DIR")? {
            config.containers_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }

        if let Some(host) = var("STATSD_HOST")? {
            config.statsd_host = host;
        }

        if let Some(secs) = positive(var("STATSD_API_TIMEOUT_SECS")?, "STATSD_API_TIMEOUT_SECS")? {
            config.api_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = positive(var("STATSD_ANNOUNCE_TIMEOUT_MS")?, "STATSD_ANNOUNCE_TIMEOUT_MS")? {
            config.announce_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = positive(
            var("STATSD_GATHER_INTERVAL_SECS")?,
            "STATSD_GATHER_INTERVAL_SECS",
        )? {
            config.gather_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn positive(value: Option<String>, name: &'static str) -> Result<Option<u64>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|source| Error::InvalidNumber {
            name,
            value: value.clone(),
            source,
        })?;
    if parsed == 0 {
        return Err(Error::Zero { name });
    }
    Ok(Some(parsed))
}
