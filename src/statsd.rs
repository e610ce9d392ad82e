//! A minimal statsd server used as the per-container metrics listener.
mod aggregator;
mod listener;
pub mod parser;

pub use aggregator::Aggregator;
pub use listener::{StatsdListener, StatsdListenerFactory};
