//! Unified error type for the vidshift engine.
//!
//! All crates funnel their failures into [`Error`]. API handlers derive an
//! HTTP status via [`Error::http_status`]; the scheduler turns engine errors
//! into a recorded [`JobFailure`] via [`Error::failure`].

use std::fmt;

use crate::job::{FailureKind, JobFailure};

/// Unified error type covering all failure modes in vidshift.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested change conflicts with the current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The container signature was not recognized.
    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    /// The container was recognized but its headers could not be parsed.
    #[error("Corrupt header: {0}")]
    CorruptHeader(String),

    /// No stream of a supported kind was found in the source.
    #[error("No decodable streams: {0}")]
    NoDecodableStreams(String),

    /// No source stream can be carried by the target format.
    #[error("Incompatible format: {0}")]
    IncompatibleFormat(String),

    /// A pipeline stage failed while executing.
    #[error("Stage failure [{stage}]: {message}")]
    Stage {
        /// The stage that failed (demux, decode, filter, encode, mux).
        stage: String,
        /// Human-readable error description.
        message: String,
    },

    /// The worker running a job disappeared.
    #[error("Worker lost: {0}")]
    WorkerLost(String),

    /// The job exceeded its hard timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation observed a cancellation request.
    #[error("Cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::UnsupportedContainer(_)
            | Error::CorruptHeader(_)
            | Error::NoDecodableStreams(_)
            | Error::IncompatibleFormat(_) => 422,
            Error::Stage { .. } => 500,
            Error::WorkerLost(_) => 500,
            Error::Timeout(_) => 504,
            Error::Cancelled => 409,
            Error::Internal(_) => 500,
        }
    }

    /// Build the failure record stored on a job that ended with this error.
    ///
    /// Errors that are not part of the engine taxonomy (I/O, tool, database)
    /// are reported as stage failures without a stage name; callers that know
    /// the originating stage should wrap them with [`Error::stage`] first.
    pub fn failure(&self) -> JobFailure {
        let (kind, stage) = match self {
            Error::UnsupportedContainer(_) => (FailureKind::UnsupportedContainer, Some("probe")),
            Error::CorruptHeader(_) => (FailureKind::CorruptHeader, Some("probe")),
            Error::NoDecodableStreams(_) => (FailureKind::NoDecodableStreams, Some("probe")),
            Error::IncompatibleFormat(_) => (FailureKind::IncompatibleFormat, Some("plan")),
            Error::Stage { stage, message } => {
                return JobFailure::new(FailureKind::StageFailure, Some(stage.clone()), message.clone());
            }
            Error::WorkerLost(_) => (FailureKind::WorkerLost, None),
            Error::Timeout(_) => (FailureKind::Timeout, None),
            _ => (FailureKind::StageFailure, None),
        };
        JobFailure::new(kind, stage.map(str::to_string), self.to_string())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Stage`].
    pub fn stage(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Stage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error is a cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn validation_display() {
        let err = Error::Validation("unknown target format 'flv'".into());
        assert_eq!(err.to_string(), "Validation error: unknown target format 'flv'");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn stage_failure_keeps_stage_name() {
        let err = Error::stage("encode", "bitstream rejected");
        assert_eq!(err.to_string(), "Stage failure [encode]: bitstream rejected");

        let failure = err.failure();
        assert_eq!(failure.kind, FailureKind::StageFailure);
        assert_eq!(failure.stage.as_deref(), Some("encode"));
        assert_eq!(failure.detail, "bitstream rejected");
    }

    #[test]
    fn probe_errors_map_to_probe_stage() {
        let failure = Error::UnsupportedContainer("unknown signature".into()).failure();
        assert_eq!(failure.kind, FailureKind::UnsupportedContainer);
        assert_eq!(failure.stage.as_deref(), Some("probe"));

        let failure = Error::CorruptHeader("truncated moov".into()).failure();
        assert_eq!(failure.kind, FailureKind::CorruptHeader);

        let failure = Error::NoDecodableStreams("only data tracks".into()).failure();
        assert_eq!(failure.kind, FailureKind::NoDecodableStreams);
    }

    #[test]
    fn incompatible_format_maps_to_plan_stage() {
        let err = Error::IncompatibleFormat("avi cannot carry subtitles".into());
        assert_eq!(err.http_status(), 422);
        let failure = err.failure();
        assert_eq!(failure.kind, FailureKind::IncompatibleFormat);
        assert_eq!(failure.stage.as_deref(), Some("plan"));
    }

    #[test]
    fn untyped_errors_become_stage_failures() {
        let err = Error::Internal("boom".into());
        let failure = err.failure();
        assert_eq!(failure.kind, FailureKind::StageFailure);
        assert!(failure.stage.is_none());
        assert_eq!(failure.detail, "Internal error: boom");
    }

    #[test]
    fn cancelled_is_not_a_failure_kind() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Timeout("30s".into()).is_cancelled());
    }
}
