//! The authoritative map from container id to its running listener.
//!
//! The [`Registry`] keeps three things in step: the in-memory map, the live
//! listener sockets and the durable records in the [`ContainerStore`]. Slow
//! work (binding sockets, disk I/O) never happens while the map lock is held;
//! instead, operations on the same container id are serialized by a per-id
//! guard so that concurrent requests for one container cannot interleave.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::accumulator::Accumulator;
use crate::container::{Container, ContainerID};
use crate::harvest::{self, GatherError};
use crate::listener::{PortProbe, ProvisionError, Provisioned, Provisioner};
use crate::store::{ContainerStore, PersistedContainer};

mod error;

pub use error::{Error, Result};

/// Outcome of [`Registry::add`].
#[derive(Debug, Clone)]
pub enum Added {
    /// The container was registered by this call.
    Created(Arc<Container>),
    /// The container was already registered; its record is unchanged.
    Existing(Arc<Container>),
}

impl Added {
    pub fn container(&self) -> &Arc<Container> {
        match self {
            Self::Created(container) | Self::Existing(container) => container,
        }
    }

    pub fn into_container(self) -> Arc<Container> {
        match self {
            Self::Created(container) | Self::Existing(container) => container,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Outcome of [`Registry::load_from_disk`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<ContainerID>,
    /// Records that could not be read or re-provisioned. They were skipped.
    pub errors: Vec<Error>,
}

pub struct Registry {
    containers: RwLock<HashMap<ContainerID, Arc<Container>>>,
    guards: DashMap<ContainerID, Arc<Mutex<()>>>,
    closed: AtomicBool,
    probe: Box<dyn PortProbe>,
    provisioner: Provisioner,
    store: Arc<dyn ContainerStore>,
    default_host: String,
}

/// Holds the per-id guard and drops its map entry once no one else waits on it.
struct IdGuard<'a> {
    guards: &'a DashMap<ContainerID, Arc<Mutex<()>>>,
    container_id: ContainerID,
    lock: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard<'_> {
    fn drop(&mut self) {
        self.lock.take();
        self.guards
            .remove_if(&self.container_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl Registry {
    /// Creates an empty registry.
    ///
    /// `default_host` is advertised for containers added without a host.
    pub fn new(
        probe: impl PortProbe + 'static,
        provisioner: Provisioner,
        store: impl ContainerStore + 'static,
        default_host: impl Into<String>,
    ) -> Self {
        Self {
            containers: RwLock::default(),
            guards: DashMap::default(),
            closed: AtomicBool::new(false),
            probe: Box::new(probe),
            provisioner,
            store: Arc::new(store),
            default_host: default_host.into(),
        }
    }

    async fn lock_id(&self, container_id: &ContainerID) -> IdGuard<'_> {
        let mutex = Arc::clone(self.guards.entry(container_id.clone()).or_default().value());
        let lock = mutex.lock_owned().await;
        IdGuard {
            guards: &self.guards,
            container_id: container_id.clone(),
            lock: Some(lock),
        }
    }

    /// Runs a store operation on the blocking thread pool.
    async fn with_store<T, F>(&self, op: F) -> crate::store::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ContainerStore) -> crate::store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(crate::store::Error::Task)?
    }

    /// Returns a snapshot of all registered containers.
    pub async fn list(&self) -> Vec<Arc<Container>> {
        self.containers.read().await.values().cloned().collect()
    }

    pub async fn get(&self, container_id: &ContainerID) -> Option<Arc<Container>> {
        self.containers.read().await.get(container_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether registered containers survive a restart.
    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Registers a container and starts its listener.
    ///
    /// An empty `host` is replaced by the registry's default host. A `port` of
    /// `0` lets the operating system pick a free port. If the container is
    /// already registered, its record is returned unchanged as
    /// [`Added::Existing`]; only the call that registered it sees
    /// [`Added::Created`].
    ///
    /// # Errors
    ///
    /// - [`Error::PortInUse`] if an explicit `port` is occupied.
    /// - [`Error::ProvisionFailed`] or [`Error::ProvisionTimeout`] if the
    ///   listener could not be started.
    /// - [`Error::PersistFailed`] if the record could not be saved. The
    ///   listener has been stopped again.
    /// - [`Error::ShuttingDown`] once [`Registry::shutdown`] was called.
    pub async fn add(
        &self,
        container_id: ContainerID,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Added> {
        let _guard = self.lock_id(&container_id).await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if let Some(existing) = self.get(&container_id).await {
            log::info!("container `{}` already exists", container_id);
            return Ok(Added::Existing(existing));
        }

        if port != 0 && !self.probe.is_free(port) {
            log::error!("attempted to start a server on an occupied port: {}", port);
            return Err(Error::PortInUse(port));
        }

        let Provisioned { listener, address } = self
            .provisioner
            .provision(&container_id, port)
            .await
            .map_err(|source| match source {
                ProvisionError::Timeout(timeout) => Error::ProvisionTimeout {
                    container_id: container_id.clone(),
                    timeout,
                },
                source => Error::ProvisionFailed {
                    container_id: container_id.clone(),
                    source,
                },
            })?;

        let host = host.into();
        let host = if host.is_empty() {
            self.default_host.clone()
        } else {
            host
        };
        let container = Container::new(container_id.clone(), host, address.port(), listener);

        let record = PersistedContainer::from(&container);
        if let Err(source) = self.with_store(move |store| store.save(&record)).await {
            log::error!("could not write container `{}` to disk: {}", container_id, source);
            self.provisioner
                .terminate(&container_id, container.listener())
                .await;
            return Err(Error::PersistFailed {
                container_id,
                source,
            });
        }

        let container = Arc::new(container);
        {
            let mut containers = self.containers.write().await;
            if !self.closed.load(Ordering::SeqCst) {
                containers.insert(container_id.clone(), Arc::clone(&container));
                log::info!(
                    "added container `{}` on {}:{}",
                    container_id,
                    container.host(),
                    container.port()
                );
                return Ok(Added::Created(container));
            }
        }

        // shutdown began while this container was being provisioned
        self.provisioner
            .terminate(&container_id, container.listener())
            .await;
        let stale = container_id.clone();
        if let Err(err) = self.with_store(move |store| store.delete(&stale)).await {
            log::error!("could not remove container `{}` from disk: {}", container_id, err);
        }
        Err(Error::ShuttingDown)
    }

    /// Stops a container's listener and unregisters it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the container is not registered.
    /// - [`Error::DeleteFailed`] if the durable record could not be removed.
    ///   The container is unregistered regardless.
    pub async fn remove(&self, container_id: &ContainerID) -> Result<()> {
        let _guard = self.lock_id(container_id).await;
        let container = self
            .get(container_id)
            .await
            .ok_or_else(|| Error::NotFound(container_id.clone()))?;

        self.provisioner
            .terminate(container_id, container.listener())
            .await;

        let stale = container_id.clone();
        let deleted = self
            .with_store(move |store| store.delete(&stale))
            .await
            .map_err(|source| {
                log::error!(
                    "could not remove container `{}` from disk: {}",
                    container_id,
                    source
                );
                Error::DeleteFailed {
                    container_id: container_id.clone(),
                    source,
                }
            });

        self.containers.write().await.remove(container_id);
        log::info!("removed container `{}`", container_id);

        deleted
    }

    /// Recreates every container recorded in the store.
    ///
    /// Each record is re-added with its persisted port as an explicit request.
    /// Records that cannot be read or re-added are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] only if the store as a whole is unreadable.
    pub async fn load_from_disk(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        if !self.store.is_durable() {
            log::info!("no containers directory was set; state will not persist");
            return Ok(report);
        }

        let loaded = self
            .with_store(|store| store.load_all())
            .await
            .map_err(Error::Load)?;
        for err in loaded.errors {
            log::error!("skipping persisted container: {}", err);
            report.errors.push(Error::Load(err));
        }

        for record in loaded.records {
            let container_id = record.container_id;
            match self
                .add(container_id.clone(), record.statsd_host, record.statsd_port)
                .await
            {
                Ok(_) => {
                    log::info!("loaded container `{}` from disk", container_id);
                    report.loaded.push(container_id);
                }
                Err(err) => {
                    log::error!("could not add container `{}`: {}", container_id, err);
                    report.errors.push(err);
                }
            }
        }

        Ok(report)
    }

    /// Collects metrics from every registered container into `acc`.
    ///
    /// See [`harvest::gather`].
    pub async fn gather(&self, acc: Arc<dyn Accumulator>) -> std::result::Result<usize, GatherError> {
        harvest::gather(self.list().await, acc).await
    }

    /// Stops every listener exactly once and refuses further additions.
    ///
    /// Durable records are kept so the containers are recreated on the next
    /// start.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<ContainerID> = self.containers.read().await.keys().cloned().collect();

        for container_id in ids {
            let _guard = self.lock_id(&container_id).await;
            let removed = self.containers.write().await.remove(&container_id);
            if let Some(container) = removed {
                self.provisioner
                    .terminate(&container_id, container.listener())
                    .await;
            }
        }
        log::info!("stopped all statsd servers");
    }
}
