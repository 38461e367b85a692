//! Bounded concurrent push of batches to the search backend.
//!
//! [`PushSink::submit`] reserves one of `budget` slots and spawns the push on
//! the Tokio runtime, returning as soon as the batch is accepted. When every
//! slot is taken it polls until one frees or the admission timeout passes.
//! Push failures are logged and counted here; the submitter only learns that
//! the batch was accepted. [`PushSink::wait_idle`] polls until no push is in
//! flight.
//!
//! The occupancy counter is the only state shared between pushes and is only
//! locked for the increment, decrement or read.

use crate::config::PushConfig;
use crate::models::MailRecord;
use crate::search::{MailDocument, SearchError, SearchService};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

/// Destination for batches of mail documents, keyed by `uid`.
pub trait DocumentBackend: Send + Sync + 'static {
    /// Add or replace `documents`.
    fn push_documents(
        &self,
        documents: Vec<MailDocument>,
    ) -> impl Future<Output = Result<(), SearchError>> + Send;
}

impl DocumentBackend for SearchService {
    async fn push_documents(&self, documents: Vec<MailDocument>) -> Result<(), SearchError> {
        self.upsert_mails(&documents).await
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no push slot became free within {0:?}")]
    AdmissionTimeout(Duration),
}

/// Counters since the sink was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub accepted_batches: usize,
    pub pushed_batches: usize,
    pub failed_batches: usize,
    pub pushed_documents: usize,
    pub failed_documents: usize,
}

#[derive(Default)]
struct SinkState {
    occupancy: Mutex<usize>,
    accepted_batches: AtomicUsize,
    pushed_batches: AtomicUsize,
    failed_batches: AtomicUsize,
    pushed_documents: AtomicUsize,
    failed_documents: AtomicUsize,
}

/// A reserved slot; releases itself when the push task ends, however it ends.
struct Slot {
    state: Arc<SinkState>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut occupancy = self.state.occupancy.lock();
        *occupancy = occupancy.saturating_sub(1);
    }
}

pub struct PushSink<B> {
    backend: Arc<B>,
    state: Arc<SinkState>,
    budget: usize,
    admission_timeout: Duration,
    poll_interval: Duration,
}

impl<B: DocumentBackend> PushSink<B> {
    pub fn new(backend: Arc<B>, config: &PushConfig) -> Self {
        Self {
            backend,
            state: Arc::new(SinkState::default()),
            budget: config.max_in_flight.max(1),
            admission_timeout: config.admission_timeout,
            poll_interval: config.poll_interval,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Pushes currently running.
    pub fn in_flight(&self) -> usize {
        *self.state.occupancy.lock()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            accepted_batches: self.state.accepted_batches.load(Ordering::Relaxed),
            pushed_batches: self.state.pushed_batches.load(Ordering::Relaxed),
            failed_batches: self.state.failed_batches.load(Ordering::Relaxed),
            pushed_documents: self.state.pushed_documents.load(Ordering::Relaxed),
            failed_documents: self.state.failed_documents.load(Ordering::Relaxed),
        }
    }

    fn try_reserve(&self) -> Option<Slot> {
        let mut occupancy = self.state.occupancy.lock();
        if *occupancy < self.budget {
            *occupancy += 1;
            Some(Slot {
                state: Arc::clone(&self.state),
            })
        } else {
            None
        }
    }

    /// Accept `batch` for pushing, waiting for a free slot if necessary.
    pub async fn submit(&self, batch: Vec<MailRecord>) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let slot = loop {
            if let Some(slot) = self.try_reserve() {
                break slot;
            }
            if started.elapsed() >= self.admission_timeout {
                log::warn!(
                    "push admission timed out after {:?} with {} pushes in flight",
                    self.admission_timeout,
                    self.in_flight()
                );
                return Err(SinkError::AdmissionTimeout(self.admission_timeout));
            }
            sleep(self.poll_interval).await;
        };

        self.state.accepted_batches.fetch_add(1, Ordering::Relaxed);
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let _slot = slot;
            let documents: Vec<MailDocument> = batch.into_iter().map(MailDocument::from).collect();
            let count = documents.len();

            match backend.push_documents(documents).await {
                Ok(()) => {
                    state.pushed_batches.fetch_add(1, Ordering::Relaxed);
                    state.pushed_documents.fetch_add(count, Ordering::Relaxed);
                    log::debug!("pushed {} documents", count);
                }
                Err(err) => {
                    state.failed_batches.fetch_add(1, Ordering::Relaxed);
                    state.failed_documents.fetch_add(count, Ordering::Relaxed);
                    log::error!("push of {} documents failed: {}", count, err);
                }
            }
        });

        Ok(())
    }

    /// Return once no push is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                return;
            }
            log::trace!("waiting for {} pushes", in_flight);
            sleep(self.poll_interval).await;
        }
    }
}
