//! Concurrent collection of metrics from every registered container.
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};

use crate::accumulator::{Accumulator, TaggedAccumulator};
use crate::container::{Container, ContainerID};
use crate::listener;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("listener failed: {0}")]
    Listener(#[source] listener::Error),
    #[error("listener panicked: {0}")]
    Panic(String),
    #[error("collection task failed: {0}")]
    Task(#[source] JoinError),
}

/// Every container whose collection failed during one harvest.
#[derive(Debug)]
pub struct GatherError {
    /// Number of containers collected successfully.
    pub collected: usize,
    pub failures: Vec<(ContainerID, CollectError)>,
}

impl fmt::Display for GatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to collect {} container(s):", self.failures.len())?;
        for (container_id, err) in &self.failures {
            write!(f, " `{}`: {};", container_id, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for GatherError {}

/// Collects every container's metrics into `acc` in parallel.
///
/// Each container is collected on its own blocking task through a
/// [`TaggedAccumulator`], so every metric carries the owning container's id.
/// A failing or panicking listener never prevents the others from delivering
/// their metrics.
///
/// Returns the number of containers collected.
pub async fn gather(
    containers: Vec<Arc<Container>>,
    acc: Arc<dyn Accumulator>,
) -> Result<usize, GatherError> {
    let mut tasks = JoinSet::new();
    for container in containers {
        let acc = Arc::clone(&acc);
        tasks.spawn(async move {
            let container_id = container.id().clone();
            let tagged = TaggedAccumulator::new(acc, container_id.clone());
            let joined =
                tokio::task::spawn_blocking(move || container.listener().collect(&tagged)).await;
            let result = match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(CollectError::Listener(err)),
                Err(err) if err.is_panic() => {
                    Err(CollectError::Panic(panic_message(err.into_panic())))
                }
                Err(err) => Err(CollectError::Task(err)),
            };
            (container_id, result)
        });
    }

    let mut collected = 0;
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => collected += 1,
            Ok((container_id, Err(err))) => {
                log::error!("could not collect container `{}`: {}", container_id, err);
                failures.push((container_id, err));
            }
            Err(err) => log::error!("harvest task failed: {}", err),
        }
    }

    if failures.is_empty() {
        Ok(collected)
    } else {
        failures.sort_by(|(a, _), (b, _)| a.cmp(b));
        Err(GatherError {
            collected,
            failures,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
