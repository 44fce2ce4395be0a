//! In-memory job store.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::watch;
use vs_core::{Error, Job, JobFilter, JobId, JobMutation, Result};

use crate::store::JobStore;

struct Record {
    job: Job,
    tx: watch::Sender<Job>,
}

#[derive(Default)]
struct Inner {
    order: Vec<JobId>,
    records: HashMap<JobId, Record>,
}

/// Keeps every job in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: Job) -> Result<Job> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&job.id) {
            return Err(Error::Conflict(format!("job {} already exists", job.id)));
        }
        let (tx, _) = watch::channel(job.clone());
        inner.order.push(job.id);
        inner.records.insert(job.id, Record { job: job.clone(), tx });
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Job> {
        self.inner
            .read()
            .records
            .get(&id)
            .map(|r| r.job.clone())
            .ok_or_else(|| Error::not_found("job", id))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let inner = self.inner.read();
        let matching = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|r| &r.job)
            .filter(|j| filter.matches(j))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    fn update(&self, id: JobId, mutation: JobMutation) -> Result<Job> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id))?;

        // Apply to a copy so a rejected mutation leaves the record intact.
        let mut job = record.job.clone();
        job.apply(mutation)?;
        record.job = job.clone();
        record.tx.send_replace(job.clone());
        Ok(job)
    }

    fn subscribe(&self, id: JobId) -> Result<watch::Receiver<Job>> {
        self.inner
            .read()
            .records
            .get(&id)
            .map(|r| r.tx.subscribe())
            .ok_or_else(|| Error::not_found("job", id))
    }
}
