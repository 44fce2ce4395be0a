//! # vs-pipeline
//!
//! Planning and execution of a single transcode job.
//!
//! - **[`Planner`]** -- turns a probed [`MediaDescriptor`](vs_probe::MediaDescriptor)
//!   and a target format into a deterministic
//!   [`PipelinePlan`](vs_core::plan::PipelinePlan), using a defaults table
//!   keyed by target and resolution tier.
//! - **[`TranscodeWorker`]** -- probes, plans and runs the five pipeline
//!   stages on blocking threads connected by bounded queues, reporting
//!   throttled progress and honoring cancellation.
//! - **[`WorkerContext`]** -- cancellation token and progress callback for
//!   one run.

pub mod context;
pub mod executor;
pub mod planner;
pub mod progress;

pub use context::{ProgressSender, WorkerContext};
pub use executor::{TranscodeWorker, WorkerOutcome};
pub use planner::{capabilities, Capabilities, Defaults, DefaultsTable, Planner};
pub use progress::ProgressThrottle;
