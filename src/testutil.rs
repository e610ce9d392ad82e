//! Fakes for the registry's injected collaborators.
use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::accumulator::{Accumulator, Metric, MetricKind};
use crate::container::ContainerID;
use crate::listener::{self, Announcement, Listener, ListenerFactory, PortProbe, StopFuture};
use crate::store::{self, ContainerStore, Loaded, PersistedContainer};

/// How a [`FakeListener`] reacts to being started.
#[derive(Debug, Clone, Copy)]
pub enum Announce {
    /// Announce `127.0.0.1` with the given port, or with a fresh port if `0`.
    Port(u16),
    /// Announce a bind error.
    BindError,
    /// Never announce anything.
    Never,
    /// Drop the announcement channel without sending.
    Drop,
}

/// How a [`FakeListener`] reacts to being collected.
#[derive(Debug, Clone)]
pub enum Collect {
    Emit(Vec<Metric>),
    Fail,
    Panic,
}

pub struct FakeListener {
    announce: Announce,
    collect: Collect,
    delay: Option<Duration>,
    stops: Arc<AtomicUsize>,
    pending: Mutex<Option<oneshot::Sender<io::Result<SocketAddr>>>>,
}

impl FakeListener {
    pub fn new(port: u16, collect: Collect) -> Self {
        Self {
            announce: Announce::Port(port),
            collect,
            delay: None,
            stops: Arc::default(),
            pending: Mutex::new(None),
        }
    }
}

impl Listener for FakeListener {
    fn start(&self) -> listener::Result<Announcement> {
        let (tx, rx) = oneshot::channel();
        match self.announce {
            Announce::Port(port) => {
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                match self.delay {
                    Some(delay) => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(Ok(addr));
                        });
                    }
                    None => {
                        let _ = tx.send(Ok(addr));
                    }
                }
            }
            Announce::BindError => {
                let _ = tx.send(Err(io::Error::from(io::ErrorKind::AddrInUse)));
            }
            Announce::Never => *self.pending.lock().unwrap() = Some(tx),
            Announce::Drop => drop(tx),
        }
        Ok(rx)
    }

    fn collect(&self, acc: &dyn Accumulator) -> listener::Result<()> {
        match &self.collect {
            Collect::Emit(metrics) => {
                metrics.iter().cloned().for_each(|m| acc.add_metric(m));
                Ok(())
            }
            Collect::Fail => Err(listener::Error::Collect("injected failure".to_owned())),
            Collect::Panic => panic!("injected panic"),
        }
    }

    fn stop(&self) -> StopFuture<'_> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

/// Creates [`FakeListener`]s that announce dynamically assigned ports from a
/// private range.
#[derive(Clone)]
pub struct FakeFactory {
    announce: Announce,
    delay: Option<Duration>,
    next_port: Arc<AtomicU16>,
    pub created: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(announce: Announce) -> Self {
        Self {
            announce,
            delay: None,
            next_port: Arc::new(AtomicU16::new(40_000)),
            created: Arc::default(),
            stops: Arc::default(),
        }
    }

    /// Listeners announce their port only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ListenerFactory for FakeFactory {
    fn create(&self, port: u16) -> Box<dyn Listener> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let announce = match self.announce {
            Announce::Port(_) if port == 0 => {
                Announce::Port(self.next_port.fetch_add(1, Ordering::SeqCst))
            }
            Announce::Port(_) => Announce::Port(port),
            other => other,
        };
        Box::new(FakeListener {
            announce,
            collect: Collect::Emit(vec![counter("fake", &[])]),
            delay: self.delay,
            stops: Arc::clone(&self.stops),
            pending: Mutex::new(None),
        })
    }
}

/// A probe that reports a fixed answer for every port.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl PortProbe for StaticProbe {
    fn is_free(&self, _port: u16) -> bool {
        self.0
    }
}

/// A store that fails selected operations.
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub fail_save: bool,
    pub fail_delete: bool,
    pub saved: Mutex<Vec<PersistedContainer>>,
}

impl ContainerStore for FaultyStore {
    fn save(&self, record: &PersistedContainer) -> store::Result<()> {
        if self.fail_save {
            return Err(store::Error::Write(crate::fsutil::FileWriteError {
                path: record.container_id.as_str().into(),
                source: io::Error::other("injected failure"),
            }));
        }
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn delete(&self, container_id: &ContainerID) -> store::Result<()> {
        if self.fail_delete {
            return Err(store::Error::Delete {
                path: container_id.as_str().into(),
                source: io::Error::other("injected failure"),
            });
        }
        Ok(())
    }

    fn load_all(&self) -> store::Result<Loaded> {
        Ok(Loaded::default())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// A store whose `save` blocks its thread until released or five seconds
/// pass.
pub struct GatedStore {
    entered: AtomicBool,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedStore {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let store = Self {
            entered: AtomicBool::new(false),
            release: Mutex::new(rx),
        };
        (store, tx)
    }

    /// Whether a `save` call has started.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }
}

impl ContainerStore for GatedStore {
    fn save(&self, record: &PersistedContainer) -> store::Result<()> {
        self.entered.store(true, Ordering::SeqCst);
        let released = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        released.map_err(|_| {
            store::Error::Write(crate::fsutil::FileWriteError {
                path: record.container_id.as_str().into(),
                source: io::Error::other("never released"),
            })
        })
    }

    fn delete(&self, _container_id: &ContainerID) -> store::Result<()> {
        Ok(())
    }

    fn load_all(&self) -> store::Result<Loaded> {
        Ok(Loaded::default())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

pub fn counter(name: &str, tags: &[(&str, &str)]) -> Metric {
    Metric::new(
        name,
        MetricKind::Counter,
        BTreeMap::from([("value".to_owned(), 1.0)]),
        tags.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        0,
    )
}
