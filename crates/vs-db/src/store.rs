//! The [`JobStore`] trait and per-job change notification.

use std::sync::Arc;

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;
use vs_core::config::StoreConfig;
use vs_core::{Job, JobFailure, JobFilter, JobId, JobMutation, JobState, Result};

use crate::memory::MemoryJobStore;
use crate::sqlite::SqliteJobStore;

/// Authoritative storage for job records.
///
/// `update` is atomic per record: the current state is read, the mutation
/// is checked against the lifecycle and applied, and the result written
/// without any other writer interleaving. Illegal transitions fail with
/// `Conflict` and leave the record untouched.
pub trait JobStore: Send + Sync {
    /// Store a new job. Fails with `Conflict` if the id exists.
    fn insert(&self, job: Job) -> Result<Job>;

    /// Fails with `NotFound` for unknown ids.
    fn get(&self, id: JobId) -> Result<Job>;

    /// Jobs matching `filter`, in submission order.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    fn update(&self, id: JobId, mutation: JobMutation) -> Result<Job>;

    /// A receiver that always holds the job's latest record.
    fn subscribe(&self, id: JobId) -> Result<watch::Receiver<Job>>;

    /// Reconcile records left behind by a previous process.
    ///
    /// Jobs still marked `Running` are failed with `WorkerLost`; the ids of
    /// `Queued` jobs are returned in submission order for re-dispatch.
    fn recover(&self) -> Result<Vec<JobId>> {
        for job in self.list(&JobFilter::with_state(JobState::Running))? {
            tracing::warn!(job_id = %job.id, "job was running when the engine stopped");
            self.update(
                job.id,
                JobMutation::Fail(JobFailure::worker_lost("engine stopped while the job was running")),
            )?;
        }
        Ok(self
            .list(&JobFilter::with_state(JobState::Queued))?
            .into_iter()
            .map(|j| j.id)
            .collect())
    }
}

/// Open the store selected by configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    Ok(match &config.db_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using SQLite job store");
            Arc::new(SqliteJobStore::open(path)?)
        }
        None => {
            tracing::info!("using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    })
}

/// Watch channels for stores whose records do not live in memory.
#[derive(Default)]
pub(crate) struct Watchers {
    senders: Mutex<HashMap<JobId, watch::Sender<Job>>>,
}

impl Watchers {
    /// Subscribe to `id`, reading the current record with `load` only when
    /// no channel exists yet. A finished job gets a detached receiver that
    /// is never tracked, since it will not change again.
    pub(crate) fn subscribe(
        &self,
        id: JobId,
        load: impl FnOnce() -> Result<Job>,
    ) -> Result<watch::Receiver<Job>> {
        let mut senders = self.senders.lock();
        if let Some(tx) = senders.get(&id) {
            return Ok(tx.subscribe());
        }
        let job = load()?;
        if job.is_terminal() {
            return Ok(watch::channel(job).1);
        }
        let (tx, rx) = watch::channel(job);
        senders.insert(id, tx);
        Ok(rx)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.senders.lock().len()
    }

    pub(crate) fn publish(&self, job: &Job) {
        let mut senders = self.senders.lock();
        if let Some(tx) = senders.get(&job.id) {
            tx.send_replace(job.clone());
            // Nobody will see further changes of a finished job.
            if job.is_terminal() {
                senders.remove(&job.id);
            }
        }
    }
}
