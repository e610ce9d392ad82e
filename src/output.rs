//! Hands harvested metrics to the output task, which writes them as JSON lines.
use std::io::{self, Write};

use tokio::sync::mpsc;

use crate::accumulator::{Accumulator, BufferedAccumulator, Metric};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("output task is no longer running")]
    Closed,
    #[error("failed to encode metric `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write metrics: {0}")]
    Write(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Buffers one harvest's metrics and sends them to the output task as a batch.
#[derive(Debug)]
pub struct ChannelAccumulator {
    buffer: BufferedAccumulator,
    tx: mpsc::Sender<Vec<Metric>>,
}

impl ChannelAccumulator {
    pub fn new(tx: mpsc::Sender<Vec<Metric>>) -> Self {
        Self {
            buffer: BufferedAccumulator::default(),
            tx,
        }
    }

    /// Sends everything buffered since the last flush. Returns the batch size.
    ///
    /// Empty batches are not sent.
    pub async fn flush(&self) -> Result<usize> {
        let batch = self.buffer.drain();
        let len = batch.len();
        if len > 0 {
            self.tx.send(batch).await.map_err(|_| Error::Closed)?;
        }
        Ok(len)
    }
}

impl Accumulator for ChannelAccumulator {
    fn add_metric(&self, metric: Metric) {
        self.buffer.add_metric(metric);
    }
}

/// Writes each metric as one JSON object per line.
pub struct JsonLinesWriter<W> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_batch(&mut self, batch: &[Metric]) -> Result<()> {
        for metric in batch {
            serde_json::to_writer(&mut self.out, metric).map_err(|source| Error::Encode {
                name: metric.name.clone(),
                source,
            })?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Writes every received batch until all senders are dropped.
///
/// Write errors are logged and never end the task.
pub async fn forward<W: Write>(mut rx: mpsc::Receiver<Vec<Metric>>, mut writer: JsonLinesWriter<W>) {
    while let Some(batch) = rx.recv().await {
        if let Err(err) = writer.write_batch(&batch) {
            log::error!("failed to write {} metric(s): {}", batch.len(), err);
        }
    }
    log::debug!("output task stopped");
}
