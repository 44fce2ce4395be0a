//! Per-job supervision: timeout, grace period and crash detection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use vs_core::{FailureKind, JobFailure, JobMutation};
use vs_pipeline::WorkerOutcome;

/// Why a running job was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Timeout,
}

/// The scheduler's handle on a dispatched job.
#[derive(Debug, Clone)]
pub(crate) struct RunningJob {
    pub(crate) token: CancellationToken,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl RunningJob {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Signal the worker. The first reason recorded sticks.
    pub(crate) fn stop(&self, reason: StopReason) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    pub(crate) fn reason(&self) -> Option<StopReason> {
        *self.reason.lock()
    }
}

/// Outcome of a worker task that ended on its own or was aborted.
pub(crate) fn joined(result: Result<WorkerOutcome, JoinError>) -> WorkerOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let detail = panic_message(e.into_panic());
            WorkerOutcome::Failed(JobFailure::worker_lost(format!("worker panicked: {detail}")))
        }
        Err(_) => WorkerOutcome::Failed(JobFailure::worker_lost("worker task was aborted")),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Decide the terminal mutation for a finished job.
///
/// A committed output always wins: the worker checks for cancellation
/// before committing, so a success means the stop request came too late.
/// A timed-out job fails with `Timeout` whatever the worker reported; a
/// crashed worker is `WorkerLost` even if a cancel was pending.
pub(crate) fn resolve(outcome: WorkerOutcome, reason: Option<StopReason>, limit: Duration) -> JobMutation {
    match (outcome, reason) {
        (WorkerOutcome::Succeeded { output }, _) => JobMutation::Succeed { output },
        (WorkerOutcome::Failed(f), _) if f.kind == FailureKind::WorkerLost => JobMutation::Fail(f),
        (_, Some(StopReason::Timeout)) => JobMutation::Fail(JobFailure::timeout(format!(
            "job exceeded its time limit of {:.1}s",
            limit.as_secs_f64()
        ))),
        (WorkerOutcome::Cancelled, _) | (_, Some(StopReason::User)) => JobMutation::Cancel,
        (WorkerOutcome::Failed(f), None) => JobMutation::Fail(f),
    }
}
