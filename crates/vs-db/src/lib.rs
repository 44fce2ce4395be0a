//! vs-db: job persistence.
//!
//! The [`JobStore`] trait is the single source of truth for job records.
//! Two implementations are provided: [`MemoryJobStore`] for ephemeral runs
//! and tests, and [`SqliteJobStore`] backed by an r2d2 SQLite pool with
//! embedded migrations, which survives restarts.

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod sqlite;
pub mod store;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
pub use store::{open_store, JobStore};
