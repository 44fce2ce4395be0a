//! Route handlers for the HTTP API.

pub mod events;
pub mod jobs;
pub mod system;
