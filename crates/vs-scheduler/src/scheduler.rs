//! Job admission, FIFO dispatch and cancellation.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vs_core::events::{EventBus, EventPayload};
use vs_core::{Error, Job, JobFilter, JobId, JobMutation, JobOptions, JobState, Result, TargetFormat};
use vs_db::JobStore;
use vs_pipeline::{ProgressSender, TranscodeWorker, WorkerContext};

use crate::supervisor::{self, RunningJob, StopReason};

/// Accepts jobs and runs them on at most `cap` workers at a time.
///
/// Cheap to clone; clones share the same queue and workers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    worker: Arc<TranscodeWorker>,
    events: Arc<EventBus>,
    queue: Mutex<VecDeque<JobId>>,
    notify: Notify,
    slots: Arc<Semaphore>,
    cap: usize,
    running: DashMap<JobId, RunningJob>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, worker: Arc<TranscodeWorker>, events: Arc<EventBus>) -> Self {
        let cap = worker.config().concurrency_cap();
        Self {
            inner: Arc::new(Inner {
                store,
                worker,
                events,
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                slots: Arc::new(Semaphore::new(cap)),
                cap,
                running: DashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn worker(&self) -> &TranscodeWorker {
        &self.inner.worker
    }

    /// Number of jobs currently holding a worker slot.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Record a new job in `Queued` and append it to the dispatch queue.
    pub fn submit(&self, source: impl Into<PathBuf>, target: TargetFormat, options: JobOptions) -> Result<Job> {
        let source = source.into();
        validate(&source, &options)?;

        let job = self.inner.store.insert(Job::new(source, target, options))?;
        self.inner.queue.lock().push_back(job.id);
        self.inner.notify.notify_one();
        self.inner.events.broadcast(EventPayload::JobQueued { job_id: job.id });
        tracing::info!(job_id = %job.id, source = %job.source.display(), target = %job.target, "job queued");
        Ok(job)
    }

    /// Request cancellation.
    ///
    /// A queued job is cancelled immediately. A running job is signalled
    /// and reaches `Cancelled` once its worker stops, or when the grace
    /// period runs out. Terminal jobs are returned unchanged.
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let job = self.inner.store.get(id)?;
        match job.state {
            JobState::Queued => match self.inner.store.update(id, JobMutation::Withdraw) {
                Ok(job) => {
                    self.inner.queue.lock().retain(|queued| *queued != id);
                    self.inner.events.broadcast(EventPayload::JobCancelled { job_id: id });
                    tracing::info!(job_id = %id, "queued job cancelled");
                    Ok(job)
                }
                // Dispatched between the read and the update.
                Err(Error::Conflict(_)) => self.signal(id),
                Err(e) => Err(e),
            },
            JobState::Running => self.signal(id),
            _ => {
                tracing::debug!(job_id = %id, state = %job.state, "cancel of finished job ignored");
                Ok(job)
            }
        }
    }

    fn signal(&self, id: JobId) -> Result<Job> {
        if let Some(running) = self.inner.running.get(&id) {
            tracing::info!(job_id = %id, "cancelling running job");
            running.stop(StopReason::User);
        }
        self.inner.store.get(id)
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        self.inner.store.get(id)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.inner.store.list(filter)
    }

    pub fn subscribe(&self, id: JobId) -> Result<watch::Receiver<Job>> {
        self.inner.store.subscribe(id)
    }

    /// Wait until `id` reaches a terminal state and return the final record.
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let mut rx = self.subscribe(id)?;
        loop {
            if rx.borrow_and_update().is_terminal() {
                return Ok(rx.borrow().clone());
            }
            if rx.changed().await.is_err() {
                return self.get(id);
            }
        }
    }

    /// Re-enqueue jobs left queued by a previous process and fail the ones
    /// it left running. Returns how many jobs were re-enqueued.
    pub fn recover(&self) -> Result<usize> {
        let ids = self.inner.store.recover()?;
        let n = ids.len();
        if n > 0 {
            self.inner.queue.lock().extend(ids);
            self.inner.notify.notify_one();
            tracing::info!(count = n, "re-enqueued jobs from previous run");
        }
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Spawn the dispatch loop on the current runtime.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    }

    /// Dispatch queued jobs in submission order until `shutdown` fires.
    ///
    /// Jobs still running at shutdown are left to finish on their own.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(cap = self.inner.cap, "scheduler started");

        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&self.inner.slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let id = loop {
                let next = self.inner.queue.lock().pop_front();
                if next.is_some() {
                    break next;
                }
                tokio::select! {
                    _ = self.inner.notify.notified() => {}
                    _ = shutdown.cancelled() => break None,
                }
            };
            let Some(id) = id else { break };

            self.dispatch(id, permit);
        }

        tracing::info!("scheduler stopped");
    }

    fn dispatch(&self, id: JobId, permit: OwnedSemaphorePermit) {
        // Registered before `Start` so a cancel racing the transition
        // always finds the token.
        let running = RunningJob::new();
        self.inner.running.insert(id, running.clone());

        let job = match self.inner.store.update(id, JobMutation::Start) {
            Ok(job) => job,
            Err(e) => {
                tracing::debug!(job_id = %id, "skipping dispatch: {e}");
                self.inner.running.remove(&id);
                return;
            }
        };
        self.inner.events.broadcast(EventPayload::JobStarted { job_id: id });
        tracing::info!(job_id = %id, running = self.inner.running.len(), "job started");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.supervise(job, running, permit).await });
    }
}

impl Inner {
    async fn supervise(self: Arc<Self>, job: Job, running: RunningJob, _permit: OwnedSemaphorePermit) {
        let id = job.id;
        let size = tokio::fs::metadata(&job.source).await.map(|m| m.len()).unwrap_or(0);
        let config = self.worker.config();
        let limit = config.job_timeout(size);
        let grace = config.cancel_grace();

        let ctx = WorkerContext::new()
            .with_cancellation(running.token.clone())
            .with_progress(self.progress_sender(id));
        let worker = Arc::clone(&self.worker);
        let mut handle = tokio::spawn(async move { worker.execute(&job, ctx).await });

        let finished = tokio::select! {
            res = &mut handle => Some(supervisor::joined(res)),
            _ = tokio::time::sleep(limit) => {
                tracing::warn!(job_id = %id, limit_secs = limit.as_secs_f64(), "job timed out");
                running.stop(StopReason::Timeout);
                None
            }
            _ = running.token.cancelled() => None,
        };

        let outcome = match finished {
            Some(outcome) => outcome,
            None => match tokio::time::timeout(grace, &mut handle).await {
                Ok(res) => supervisor::joined(res),
                Err(_) => {
                    // Aborting drops the job's future; stage threads blocked
                    // inside a codec call keep running until that call returns.
                    tracing::warn!(
                        job_id = %id,
                        reason = ?running.reason(),
                        grace_secs = grace.as_secs_f64(),
                        "worker ignored cancellation; abandoning it and releasing its slot, \
                         its stage threads are no longer counted against the cap"
                    );
                    handle.abort();
                    vs_pipeline::WorkerOutcome::Cancelled
                }
            },
        };

        let mutation = supervisor::resolve(outcome, running.reason(), limit);
        match self.store.update(id, mutation) {
            Ok(job) => self.events.broadcast(EventPayload::for_job(&job)),
            Err(e) => tracing::error!(job_id = %id, "failed to record final state: {e}"),
        }
        self.running.remove(&id);
    }

    fn progress_sender(self: &Arc<Self>, id: JobId) -> ProgressSender {
        let inner = Arc::clone(self);
        ProgressSender::new(move |progress| match inner.store.update(id, JobMutation::Progress(progress)) {
            Ok(job) => inner.events.broadcast(EventPayload::JobProgress {
                job_id: id,
                progress: job.progress,
            }),
            Err(e) => tracing::debug!(job_id = %id, "progress not recorded: {e}"),
        })
    }
}

fn validate(source: &std::path::Path, options: &JobOptions) -> Result<()> {
    if source.as_os_str().is_empty() {
        return Err(Error::Validation("source path is empty".into()));
    }
    if !source.is_file() {
        return Err(Error::Validation(format!("source is not a file: {}", source.display())));
    }
    if options.video_bitrate_kbps == Some(0) || options.audio_bitrate_kbps == Some(0) {
        return Err(Error::Validation("bitrates must be positive".into()));
    }
    if let Some(r) = options.resolution {
        if r.width == 0 || r.height == 0 {
            return Err(Error::Validation(format!("invalid resolution {r}")));
        }
    }
    Ok(())
}
