//! # vs-scheduler
//!
//! Admission and dispatch of transcode jobs.
//!
//! The [`Scheduler`] owns the FIFO queue of pending jobs and a semaphore
//! sized to the concurrency cap. Each dispatched job runs under a
//! supervisor task that enforces the hard timeout, waits out the grace
//! period after a cancel, detects crashed workers and records the final
//! state in the job store.

mod scheduler;
mod supervisor;

pub use scheduler::Scheduler;
pub use supervisor::StopReason;
