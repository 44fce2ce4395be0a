//! Job lifecycle events for push notification.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring buffer of recent events so late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;
use crate::job::{FailureKind, Job, JobState};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        progress: f32,
    },
    JobSucceeded {
        job_id: JobId,
        output: PathBuf,
    },
    JobFailed {
        job_id: JobId,
        kind: FailureKind,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
}

impl EventPayload {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobQueued { job_id }
            | Self::JobStarted { job_id }
            | Self::JobProgress { job_id, .. }
            | Self::JobSucceeded { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => *job_id,
        }
    }

    /// The event describing `job`'s current state.
    pub fn for_job(job: &Job) -> Self {
        let job_id = job.id;
        match job.state {
            JobState::Queued => Self::JobQueued { job_id },
            JobState::Running if job.progress > 0.0 => Self::JobProgress {
                job_id,
                progress: job.progress,
            },
            JobState::Running => Self::JobStarted { job_id },
            JobState::Succeeded => Self::JobSucceeded {
                job_id,
                output: job.output.clone().unwrap_or_default(),
            },
            JobState::Failed => {
                let (kind, error) = job
                    .error
                    .as_ref()
                    .map(|f| (f.kind, f.to_string()))
                    .unwrap_or((FailureKind::StageFailure, String::new()));
                Self::JobFailed { job_id, kind, error }
            }
            JobState::Cancelled => Self::JobCancelled { job_id },
        }
    }

    /// Whether this event reports a terminal transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobSucceeded { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// `capacity` sizes the broadcast channel, not the ring buffer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send an event to all current subscribers and remember it.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.recent.read().iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
