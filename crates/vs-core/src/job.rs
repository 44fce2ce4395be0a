//! The job record and its lifecycle state machine.
//!
//! A [`Job`] only ever changes through [`Job::apply`], which validates the
//! requested [`JobMutation`] against the current [`JobState`]. Illegal moves
//! (anything out of a terminal state, `Queued -> Succeeded`, ...) are rejected
//! with [`Error::Conflict`] and leave the record untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::ids::JobId;
use crate::media::{Resolution, TargetFormat};

/// Highest progress value a job may report while still running. Exactly
/// `1.0` is reserved for `Succeeded`.
pub const RUNNING_PROGRESS_CEILING: f32 = 0.999;

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// ```text
/// Queued --dispatch--> Running --success--> Succeeded
///    |                    |----error-----> Failed
///    |                    '----cancel----> Cancelled
///    '------cancel------------------------> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// The state reached by applying `mutation`, or `None` if the move is
    /// not an edge of the lifecycle graph.
    pub fn next(self, mutation: &JobMutation) -> Option<JobState> {
        use JobMutation as M;
        match (self, mutation) {
            (Self::Queued, M::Start) => Some(Self::Running),
            (Self::Queued, M::Cancel | M::Withdraw) => Some(Self::Cancelled),
            (Self::Running, M::Progress(_)) => Some(Self::Running),
            (Self::Running, M::Succeed { .. }) => Some(Self::Succeeded),
            (Self::Running, M::Fail(_)) => Some(Self::Failed),
            (Self::Running, M::Cancel) => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Validation(format!("unknown job state '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedContainer,
    CorruptHeader,
    NoDecodableStreams,
    IncompatibleFormat,
    StageFailure,
    WorkerLost,
    Timeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedContainer => "unsupported_container",
            Self::CorruptHeader => "corrupt_header",
            Self::NoDecodableStreams => "no_decodable_streams",
            Self::IncompatibleFormat => "incompatible_format",
            Self::StageFailure => "stage_failure",
            Self::WorkerLost => "worker_lost",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unsupported_container" => Ok(Self::UnsupportedContainer),
            "corrupt_header" => Ok(Self::CorruptHeader),
            "no_decodable_streams" => Ok(Self::NoDecodableStreams),
            "incompatible_format" => Ok(Self::IncompatibleFormat),
            "stage_failure" => Ok(Self::StageFailure),
            "worker_lost" => Ok(Self::WorkerLost),
            "timeout" => Ok(Self::Timeout),
            other => Err(Error::Validation(format!("unknown failure kind '{other}'"))),
        }
    }
}

/// Failure detail recorded on a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Originating stage (probe, plan, demux, decode, filter, encode, mux).
    pub stage: Option<String>,
    /// Human-readable cause.
    pub detail: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, stage: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }

    pub fn worker_lost(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::WorkerLost, None, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, None, detail)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "{} in {stage}: {}", self.kind, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Caller-supplied overrides for the planner's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub video_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    pub resolution: Option<Resolution>,
}

/// A change requested against a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    /// Dispatched to a worker slot.
    Start,
    /// Fraction of source bytes consumed so far.
    Progress(f32),
    Succeed { output: PathBuf },
    Fail(JobFailure),
    Cancel,
    /// Cancel a job that has not been dispatched. Unlike `Cancel`, this is
    /// rejected once the job is running.
    Withdraw,
}

impl JobMutation {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress(_) => "progress",
            Self::Succeed { .. } => "succeed",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::Withdraw => "withdraw",
        }
    }
}

/// A unit of transcoding work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: PathBuf,
    pub target: TargetFormat,
    pub options: JobOptions,
    pub state: JobState,
    pub progress: f32,
    /// Present only when `state == Failed`.
    pub error: Option<JobFailure>,
    /// Present only when `state == Succeeded`.
    pub output: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly submitted job in `Queued`.
    pub fn new(source: impl Into<PathBuf>, target: TargetFormat, options: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            source: source.into(),
            target,
            options,
            state: JobState::Queued,
            progress: 0.0,
            error: None,
            output: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a mutation, enforcing the lifecycle graph and progress rules.
    pub fn apply(&mut self, mutation: JobMutation) -> Result<()> {
        let Some(next) = self.state.next(&mutation) else {
            return Err(Error::Conflict(format!(
                "job {} cannot {} while {}",
                self.id,
                mutation.name(),
                self.state
            )));
        };

        let now = Utc::now();
        match mutation {
            JobMutation::Start => {
                self.started_at = Some(now);
            }
            JobMutation::Progress(p) => {
                let p = if p.is_finite() { p } else { 0.0 };
                let p = p.clamp(0.0, RUNNING_PROGRESS_CEILING);
                // Monotonic while running.
                if p > self.progress {
                    self.progress = p;
                }
            }
            JobMutation::Succeed { output } => {
                self.progress = 1.0;
                self.output = Some(output);
                self.completed_at = Some(now);
            }
            JobMutation::Fail(failure) => {
                self.error = Some(failure);
                self.completed_at = Some(now);
            }
            JobMutation::Cancel | JobMutation::Withdraw => {
                self.progress = 0.0;
                self.completed_at = Some(now);
            }
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JobFilter
// ---------------------------------------------------------------------------

/// Selection criteria for listing jobs. Results are in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.state.map_or(true, |s| s == job.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Container;

    fn job() -> Job {
        Job::new("/media/in.mkv", Container::Mp4, JobOptions::default())
    }

    #[test]
    fn new_job_is_queued_with_zero_progress() {
        let j = job();
        assert_eq!(j.state, JobState::Queued);
        assert_eq!(j.progress, 0.0);
        assert!(j.error.is_none());
        assert!(j.output.is_none());
    }

    #[test]
    fn happy_path_reaches_exactly_one() {
        let mut j = job();
        j.apply(JobMutation::Start).unwrap();
        assert!(j.started_at.is_some());
        j.apply(JobMutation::Progress(0.4)).unwrap();
        j.apply(JobMutation::Progress(1.0)).unwrap();
        assert!(j.progress < 1.0, "running progress must stay below 1.0");

        j.apply(JobMutation::Succeed {
            output: "/out/in.mp4".into(),
        })
        .unwrap();
        assert_eq!(j.state, JobState::Succeeded);
        assert_eq!(j.progress, 1.0);
        assert_eq!(j.output.as_deref(), Some(std::path::Path::new("/out/in.mp4")));
        assert!(j.completed_at.is_some());
    }

    #[test]
    fn progress_is_monotonic() {
        let mut j = job();
        j.apply(JobMutation::Start).unwrap();
        j.apply(JobMutation::Progress(0.6)).unwrap();
        j.apply(JobMutation::Progress(0.3)).unwrap();
        assert_eq!(j.progress, 0.6);
        j.apply(JobMutation::Progress(f32::NAN)).unwrap();
        assert_eq!(j.progress, 0.6);
    }

    #[test]
    fn progress_rejected_outside_running() {
        let mut j = job();
        let err = j.apply(JobMutation::Progress(0.5)).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(j.progress, 0.0);
    }

    #[test]
    fn cancel_resets_progress() {
        let mut j = job();
        j.apply(JobMutation::Start).unwrap();
        j.apply(JobMutation::Progress(0.7)).unwrap();
        j.apply(JobMutation::Cancel).unwrap();
        assert_eq!(j.state, JobState::Cancelled);
        assert_eq!(j.progress, 0.0);
    }

    #[test]
    fn withdraw_only_applies_to_queued() {
        let mut queued = job();
        queued.apply(JobMutation::Withdraw).unwrap();
        assert_eq!(queued.state, JobState::Cancelled);
        assert!(queued.completed_at.is_some());

        let mut running = job();
        running.apply(JobMutation::Start).unwrap();
        let err = running.apply(JobMutation::Withdraw).unwrap_err();
        assert!(matches!(err, Error::Conflict(ref m) if m.contains("withdraw")));
        assert_eq!(running.state, JobState::Running);
        assert!(running.completed_at.is_none());
    }

    #[test]
    fn queued_cannot_succeed_or_fail() {
        let mut j = job();
        assert!(j
            .apply(JobMutation::Succeed {
                output: "/x.mp4".into()
            })
            .is_err());
        assert!(j.apply(JobMutation::Fail(JobFailure::worker_lost("gone"))).is_err());
        assert_eq!(j.state, JobState::Queued);
    }

    #[test]
    fn terminal_states_are_immutable() {
        for mutation in [
            JobMutation::Start,
            JobMutation::Progress(0.1),
            JobMutation::Cancel,
            JobMutation::Fail(JobFailure::timeout("late")),
        ] {
            let mut j = job();
            j.apply(JobMutation::Cancel).unwrap();
            let before = j.clone();
            assert!(j.apply(mutation).is_err());
            assert_eq!(j, before);
        }
    }

    #[test]
    fn failure_records_error_only_on_failed() {
        let mut j = job();
        j.apply(JobMutation::Start).unwrap();
        j.apply(JobMutation::Fail(JobFailure::new(
            FailureKind::StageFailure,
            Some("decode".into()),
            "invalid NAL unit",
        )))
        .unwrap();
        assert_eq!(j.state, JobState::Failed);
        assert!(j.output.is_none());
        let err = j.error.as_ref().unwrap();
        assert_eq!(err.to_string(), "stage_failure in decode: invalid NAL unit");
    }

    #[test]
    fn state_strings_roundtrip() {
        for s in ["queued", "running", "succeeded", "failed", "cancelled"] {
            assert_eq!(s.parse::<JobState>().unwrap().as_str(), s);
        }
        assert!("paused".parse::<JobState>().is_err());
        assert_eq!("worker_lost".parse::<FailureKind>().unwrap(), FailureKind::WorkerLost);
    }

    #[test]
    fn filter_matches_state() {
        let j = job();
        assert!(JobFilter::default().matches(&j));
        assert!(JobFilter::with_state(JobState::Queued).matches(&j));
        assert!(!JobFilter::with_state(JobState::Running).matches(&j));
    }
}
