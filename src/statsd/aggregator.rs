use std::collections::{BTreeMap, HashMap, HashSet};

use crate::accumulator::Accumulator;

use super::parser::{MetricType, Sample, SampleValue};

/// Identifies one series: a metric name plus its tag set.
type SeriesKey = (String, BTreeMap<String, String>);

#[derive(Debug, Default)]
struct Timing {
    values: Vec<f64>,
    /// Sample-rate adjusted number of observations.
    count: f64,
}

/// Aggregates decoded samples between two collections.
///
/// Every series is cleared when it is flushed; gauges included.
#[derive(Debug, Default)]
pub struct Aggregator {
    counters: HashMap<SeriesKey, f64>,
    gauges: HashMap<SeriesKey, f64>,
    timings: HashMap<SeriesKey, Timing>,
    sets: HashMap<SeriesKey, HashSet<String>>,
}

impl Aggregator {
    pub fn ingest(&mut self, sample: Sample<'_>) {
        let key = (sample.name.to_owned(), sample.tags);
        match (sample.metric_type, sample.value) {
            (MetricType::Counter, SampleValue::Number(v)) => {
                *self.counters.entry(key).or_default() += v / sample.sample_rate;
            }
            (MetricType::Gauge, SampleValue::Number(v)) => {
                self.gauges.insert(key, v);
            }
            (MetricType::Gauge, SampleValue::Delta(v)) => {
                *self.gauges.entry(key).or_default() += v;
            }
            (MetricType::Timing, SampleValue::Number(v)) => {
                let timing = self.timings.entry(key).or_default();
                timing.values.push(v);
                timing.count += 1.0 / sample.sample_rate;
            }
            (MetricType::Set, SampleValue::Member(member)) => {
                self.sets.entry(key).or_default().insert(member.to_owned());
            }
            (metric_type, value) => {
                log::debug!(
                    "ignoring {:?} value {:?} for `{}`",
                    metric_type,
                    value,
                    key.0
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
            && self.gauges.is_empty()
            && self.timings.is_empty()
            && self.sets.is_empty()
    }

    /// Writes every aggregated series to `acc` and resets the aggregator.
    pub fn flush(&mut self, acc: &dyn Accumulator, timestamp: u64) {
        for ((name, tags), value) in self.counters.drain() {
            acc.add_counter(&name, value_field(value), tags, timestamp);
        }
        for ((name, tags), value) in self.gauges.drain() {
            acc.add_gauge(&name, value_field(value), tags, timestamp);
        }
        for ((name, tags), members) in self.sets.drain() {
            acc.add_fields(&name, value_field(members.len() as f64), tags, timestamp);
        }
        for ((name, tags), timing) in self.timings.drain() {
            if let Some(fields) = timing_fields(&timing) {
                acc.add_histogram(&name, fields, tags, timestamp);
            }
        }
    }
}

fn value_field(value: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([("value".to_owned(), value)])
}

fn timing_fields(timing: &Timing) -> Option<BTreeMap<String, f64>> {
    let n = timing.values.len() as f64;
    let lower = timing.values.iter().copied().reduce(f64::min)?;
    let upper = timing.values.iter().copied().reduce(f64::max)?;
    let sum: f64 = timing.values.iter().sum();
    let mean = sum / n;
    let variance = timing
        .values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / n;

    Some(BTreeMap::from([
        ("count".to_owned(), timing.count),
        ("lower".to_owned(), lower),
        ("upper".to_owned(), upper),
        ("mean".to_owned(), mean),
        ("sum".to_owned(), sum),
        ("stddev".to_owned(), variance.sqrt()),
    ]))
}
