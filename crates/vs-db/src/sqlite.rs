//! SQLite-backed job store.

use std::path::Path;

use rusqlite::TransactionBehavior;
use tokio::sync::watch;
use vs_core::{Error, Job, JobFilter, JobId, JobMutation, Result};

use crate::pool::{self, DbPool};
use crate::queries::jobs;
use crate::store::{JobStore, Watchers};

pub struct SqliteJobStore {
    pool: DbPool,
    watchers: Watchers,
}

impl SqliteJobStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self::with_pool(pool::init_pool(&path.to_string_lossy())?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_pool(pool::init_memory_pool()?))
    }

    pub fn with_pool(pool: DbPool) -> Self {
        Self {
            pool,
            watchers: Watchers::default(),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: Job) -> Result<Job> {
        let conn = pool::get_conn(&self.pool)?;
        jobs::insert_job(&conn, &job)?;
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Job> {
        let conn = pool::get_conn(&self.pool)?;
        jobs::get_job(&conn, id)?.ok_or_else(|| Error::not_found("job", id))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = pool::get_conn(&self.pool)?;
        jobs::list_jobs(&conn, filter)
    }

    fn update(&self, id: JobId, mutation: JobMutation) -> Result<Job> {
        let mut conn = pool::get_conn(&self.pool)?;
        // IMMEDIATE takes the write lock before the read.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::database(e.to_string()))?;

        let mut job = jobs::get_job(&tx, id)?.ok_or_else(|| Error::not_found("job", id))?;
        job.apply(mutation)?;
        jobs::write_job(&tx, &job)?;
        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        self.watchers.publish(&job);
        Ok(job)
    }

    fn subscribe(&self, id: JobId) -> Result<watch::Receiver<Job>> {
        self.watchers.subscribe(id, || self.get(id))
    }
}
