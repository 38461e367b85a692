//! Source → normalizer → batcher → sink.
//!
//! One producer walks the source sequentially on a blocking thread,
//! normalizing each message and handing full batches to the sink. The only
//! parallelism is the sink's concurrent pushes. Messages that fail to
//! normalize are logged and skipped.

use super::batcher::Batcher;
use super::parser::normalize;
use super::sink::{DocumentBackend, PushSink, SinkError};
use super::source::SourceItem;
use crate::models::MailRecord;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sink rejected batch: {0}")]
    Sink(#[from] SinkError),
    #[error("producer thread failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub seen: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub batches: usize,
}

impl PipelineStats {
    pub fn merge(&mut self, other: PipelineStats) {
        self.seen += other.seen;
        self.normalized += other.normalized;
        self.skipped += other.skipped;
        self.batches += other.batches;
    }
}

pub struct Pipeline<B> {
    sink: Arc<PushSink<B>>,
    batch_size: usize,
}

impl<B: DocumentBackend> Pipeline<B> {
    pub fn new(sink: Arc<PushSink<B>>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
        }
    }

    pub fn sink(&self) -> &Arc<PushSink<B>> {
        &self.sink
    }

    /// Drive `source` to exhaustion on a blocking thread.
    ///
    /// Returns once every batch has been accepted by the sink; pushes may
    /// still be running, see [`PushSink::wait_idle`].
    pub async fn run<I>(&self, source: I) -> Result<PipelineStats, PipelineError>
    where
        I: IntoIterator<Item = SourceItem> + Send + 'static,
    {
        let handle = Handle::current();
        let producer = Self {
            sink: Arc::clone(&self.sink),
            batch_size: self.batch_size,
        };

        tokio::task::spawn_blocking(move || producer.run_blocking(&handle, source)).await?
    }

    /// Drive `source` on the current thread, blocking on `handle` for each submit.
    ///
    /// Must not be called from inside an async task.
    pub fn run_blocking<I>(&self, handle: &Handle, source: I) -> Result<PipelineStats, PipelineError>
    where
        I: IntoIterator<Item = SourceItem>,
    {
        let mut batcher = Batcher::new(self.batch_size);
        let mut stats = PipelineStats::default();

        for item in source {
            stats.seen += 1;
            match normalize(item) {
                Ok(record) => {
                    stats.normalized += 1;
                    if let Some(batch) = batcher.push(record) {
                        self.submit(handle, batch, &mut stats)?;
                    }
                }
                Err(err) => {
                    stats.skipped += 1;
                    log::warn!("skipping message #{}: {}", stats.seen, err);
                }
            }
        }

        if let Some(batch) = batcher.finish() {
            self.submit(handle, batch, &mut stats)?;
        }

        log::info!(
            "source exhausted: {} messages, {} normalized, {} skipped, {} batches",
            stats.seen,
            stats.normalized,
            stats.skipped,
            stats.batches
        );
        Ok(stats)
    }

    fn submit(
        &self,
        handle: &Handle,
        batch: Vec<MailRecord>,
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        stats.batches += 1;
        log::debug!("submitting batch {} ({} records)", stats.batches, batch.len());
        handle.block_on(self.sink.submit(batch))?;
        Ok(())
    }
}
