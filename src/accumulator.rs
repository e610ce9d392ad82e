//! Metric model and the sinks that harvested metrics are written into.
//!
//! Listeners never talk to the output pipeline directly. During a harvest each
//! listener is handed an [`Accumulator`], usually a [`TaggedAccumulator`] that
//! stamps the owning container's id onto every metric before forwarding it to
//! the shared sink.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::container::ContainerID;

/// Tag key under which the owning container's id is attached to every metric.
pub const CONTAINER_ID_TAG: &str = "container_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Untyped,
    Counter,
    Gauge,
    Histogram,
}

/// A single measurement with its fields and tags.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub fields: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Seconds since the UNIX epoch.
    pub timestamp: u64,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        kind: MetricKind,
        fields: BTreeMap<String, f64>,
        tags: BTreeMap<String, String>,
        timestamp: u64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            fields,
            tags,
            timestamp,
        }
    }
}

/// A sink for metrics.
///
/// Implementations must be shareable across the concurrent collection tasks of
/// a harvest, hence the `&self` receivers.
pub trait Accumulator: Send + Sync {
    fn add_metric(&self, metric: Metric);

    fn add_fields(
        &self,
        name: &str,
        fields: BTreeMap<String, f64>,
        tags: BTreeMap<String, String>,
        timestamp: u64,
    ) {
        self.add_metric(Metric::new(name, MetricKind::Untyped, fields, tags, timestamp));
    }

    fn add_gauge(
        &self,
        name: &str,
        fields: BTreeMap<String, f64>,
        tags: BTreeMap<String, String>,
        timestamp: u64,
    ) {
        self.add_metric(Metric::new(name, MetricKind::Gauge, fields, tags, timestamp));
    }

    fn add_counter(
        &self,
        name: &str,
        fields: BTreeMap<String, f64>,
        tags: BTreeMap<String, String>,
        timestamp: u64,
    ) {
        self.add_metric(Metric::new(name, MetricKind::Counter, fields, tags, timestamp));
    }

    fn add_histogram(
        &self,
        name: &str,
        fields: BTreeMap<String, f64>,
        tags: BTreeMap<String, String>,
        timestamp: u64,
    ) {
        self.add_metric(Metric::new(name, MetricKind::Histogram, fields, tags, timestamp));
    }
}

/// Forwards metrics to an inner accumulator, tagging each with a container id.
///
/// The injected `container_id` tag always wins over a tag of the same key set
/// by the emitting application.
pub struct TaggedAccumulator {
    inner: Arc<dyn Accumulator>,
    container_id: ContainerID,
}

impl TaggedAccumulator {
    pub fn new(inner: Arc<dyn Accumulator>, container_id: ContainerID) -> Self {
        Self {
            inner,
            container_id,
        }
    }
}

impl Accumulator for TaggedAccumulator {
    fn add_metric(&self, mut metric: Metric) {
        metric
            .tags
            .insert(CONTAINER_ID_TAG.to_owned(), self.container_id.to_string());
        self.inner.add_metric(metric);
    }
}

/// Buffers metrics in memory until they are drained.
#[derive(Debug, Default)]
pub struct BufferedAccumulator {
    metrics: Mutex<Vec<Metric>>,
}

impl BufferedAccumulator {
    /// Takes every buffered metric, leaving the buffer empty.
    pub fn drain(&self) -> Vec<Metric> {
        std::mem::take(&mut *self.metrics.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Accumulator for BufferedAccumulator {
    fn add_metric(&self, metric: Metric) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metric);
    }
}
