//! statsd-manager: per-container statsd endpoints with a small HTTP control
//! plane.
//!
//! Each registered container gets its own UDP statsd listener. Metrics
//! received on those listeners are harvested periodically, tagged with the
//! owning container's id and written to the output pipeline. Registered
//! containers are persisted so their listeners are recreated on restart.
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};

use crate::error::ResultOkLogExt;

pub mod accumulator;
pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod fsutil;
pub mod harvest;
pub mod listener;
pub mod output;
pub mod registry;
pub mod statsd;
pub mod store;
pub mod systemd;

#[cfg(test)]
mod testutil;

/// Builds the registry with the store selected by `config`.
fn build_registry(config: &config::Config) -> store::Result<registry::Registry> {
    let provisioner = listener::Provisioner::new(
        statsd::StatsdListenerFactory::default(),
        config.announce_timeout,
    );
    let registry = match &config.containers_dir {
        Some(dir) => {
            let store = store::DirectoryStore::open(dir)?;
            log::info!("persisting containers in {}", store.dir().display());
            registry::Registry::new(
                listener::UdpPortProbe,
                provisioner,
                store,
                config.statsd_host.clone(),
            )
        }
        None => {
            log::warn!("no containers directory configured, keeping state in memory only");
            registry::Registry::new(
                listener::UdpPortProbe,
                provisioner,
                store::MemoryStore,
                config.statsd_host.clone(),
            )
        }
    };
    Ok(registry)
}

async fn harvest_once(registry: &registry::Registry, acc: &Arc<output::ChannelAccumulator>) {
    match registry.gather(Arc::clone(acc) as Arc<dyn accumulator::Accumulator>).await {
        Ok(collected) => log::trace!("collected {} container(s)", collected),
        Err(err) => log::warn!(
            "collected {} container(s), {} failed",
            err.collected,
            err.failures.len()
        ),
    }
    if let Some(sent) = acc.flush().await.ok_log_context("could not send metrics") {
        log::trace!("sent {} metric(s) to output", sent);
    }
}

/// Runs the statsd manager until SIGINT or SIGTERM.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration values.
/// - An unreadable containers directory.
/// - Failure to bind the control API, including a missing systemd socket.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    log::debug!("Configuration: {:?}", config);

    let registry = Arc::new(build_registry(&config)?);
    let report = registry.load_from_disk().await?;
    log::info!(
        "loaded {} container(s) from disk, skipped {}",
        report.loaded.len(),
        report.errors.len()
    );

    let (tx, rx) = mpsc::channel::<Vec<accumulator::Metric>>(10);
    let output_task = tokio::spawn(output::forward(
        rx,
        output::JsonLinesWriter::new(std::io::stdout()),
    ));
    let acc = Arc::new(output::ChannelAccumulator::new(tx));

    let (stop_api, api_stopped) = oneshot::channel::<()>();
    let mut api_task = {
        let server = api::APIServer::new(Arc::clone(&registry), config.api_timeout);
        let listen = config.api_listen.clone();
        tokio::spawn(async move {
            server
                .listen(&listen, async move {
                    let _ = api_stopped.await;
                })
                .await
        })
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut interval = tokio::time::interval(config.gather_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let api_result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("received SIGINT, shutting down");
                break None;
            }
            _ = sigterm.recv() => {
                log::info!("received SIGTERM, shutting down");
                break None;
            }
            result = &mut api_task => break Some(result),
            _ = interval.tick() => harvest_once(&registry, &acc).await,
        }
    };

    let api_result = match api_result {
        Some(result) => result,
        None => {
            let _ = stop_api.send(());
            match tokio::time::timeout(config.api_timeout, &mut api_task).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!(
                        "API server did not stop within {:?}, aborting",
                        config.api_timeout
                    );
                    api_task.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    harvest_once(&registry, &acc).await;
    registry.shutdown().await;
    drop(acc);
    output_task.await.ok_log_context("output task failed");

    api_result?.map_err(Into::into)
}
