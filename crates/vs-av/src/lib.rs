//! # vs-av
//!
//! Codec backends and external tool management for the transcode worker.
//!
//! - **Stage handles** ([`Decoder`], [`Filter`], [`Encoder`], [`Muxer`]) --
//!   the units of work a worker drives, opened together per job through a
//!   [`CodecBackend`] and released when dropped.
//! - **[`FfmpegBackend`]** -- the default. Feeds the payload through the
//!   `ffmpeg` CLI with arguments derived from the pipeline plan.
//! - **[`PassthroughBackend`]** -- copies the source unchanged and refuses
//!   any plan that changes the container or a stream. Needs no external
//!   tools.
//! - **Tool discovery** ([`ToolRegistry`]) -- find and version-check ffmpeg.
//! - **Output staging** ([`OutputStaging`]) -- write to a partial file that
//!   is renamed into place on success and deleted otherwise.

pub mod backend;
pub mod ffmpeg;
pub mod passthrough;
pub mod tools;
pub mod workspace;

pub use backend::{
    backend_for, CodecBackend, Decoder, Encoder, Filter, Frame, Muxer, Packet, SessionRequest,
    StageHandles,
};
pub use ffmpeg::FfmpegBackend;
pub use passthrough::PassthroughBackend;
pub use tools::{ToolInfo, ToolRegistry};
pub use workspace::OutputStaging;
