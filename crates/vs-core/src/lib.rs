//! vs-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other vs-* crates. It
//! owns the job data model and its state machine, the media-domain enums
//! used by the prober and planner, the unified error type and the failure
//! taxonomy recorded on failed jobs.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod media;
pub mod plan;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use job::*;
pub use media::*;
