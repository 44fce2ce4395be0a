//! Stage handle traits and the backend that opens them.
//!
//! Handles are synchronous: each one is driven from its own blocking worker
//! thread and exchanges [`Packet`]s and [`Frame`]s through bounded queues.
//! Releasing a handle is dropping it, so every exit path of a stage (success,
//! error, cancellation, unwinding) releases the underlying resources.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use vs_core::config::{BackendKind, ToolsConfig};
use vs_core::plan::PipelinePlan;
use vs_core::Result;

use crate::ffmpeg::FfmpegBackend;
use crate::passthrough::PassthroughBackend;
use crate::tools::ToolRegistry;

/// A unit of compressed data (demuxer and encoder output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u64,
    pub data: Bytes,
}

/// A unit of decoded data (decoder and filter output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u64,
    pub data: Bytes,
}

pub trait Decoder: Send {
    fn decode(&mut self, packet: Packet) -> Result<Vec<Frame>>;

    /// Drain buffered frames at end of stream.
    fn flush(&mut self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

pub trait Filter: Send {
    fn apply(&mut self, frame: Frame) -> Result<Vec<Frame>>;

    fn flush(&mut self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

pub trait Encoder: Send {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>>;

    /// Drain buffered packets at end of stream.
    fn flush(&mut self) -> Result<Vec<Packet>> {
        Ok(Vec::new())
    }
}

pub trait Muxer: Send {
    fn write(&mut self, packet: Packet) -> Result<()>;

    /// Complete the output file. Called once after the last packet.
    fn finish(&mut self) -> Result<()>;
}

/// Everything a backend needs to open the handles for one job.
pub struct SessionRequest<'a> {
    pub plan: &'a PipelinePlan,
    pub source: &'a Path,
    /// Where the muxer must write (the staging file, not the final path).
    pub output: &'a Path,
    /// Lets a handle abandon a long unit of work, such as waiting on a
    /// child process, when the job is cancelled.
    pub cancel: CancellationToken,
}

/// The handles for one job. `filters` holds one handle per plan filter, in
/// plan order.
pub struct StageHandles {
    pub decoder: Box<dyn Decoder>,
    pub filters: Vec<Box<dyn Filter>>,
    pub encoder: Box<dyn Encoder>,
    pub muxer: Box<dyn Muxer>,
}

/// Opens stage handles for a planned conversion.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, request: &SessionRequest<'_>) -> Result<StageHandles>;
}

/// Build the backend selected in configuration.
pub fn backend_for(kind: BackendKind, tools: &ToolsConfig) -> Result<Arc<dyn CodecBackend>> {
    Ok(match kind {
        BackendKind::Passthrough => Arc::new(PassthroughBackend::new()),
        BackendKind::Ffmpeg => {
            let registry = ToolRegistry::discover(tools);
            Arc::new(FfmpegBackend::from_registry(&registry)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Filter for Doubler {
        fn apply(&mut self, frame: Frame) -> Result<Vec<Frame>> {
            Ok(vec![frame.clone(), frame])
        }
    }

    #[test]
    fn default_flush_is_empty() {
        let mut f = Doubler;
        let out = f
            .apply(Frame {
                seq: 3,
                data: Bytes::from_static(b"abc"),
            })
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(f.flush().unwrap().is_empty());
    }

    #[test]
    fn passthrough_backend_needs_no_tools() {
        let backend = backend_for(BackendKind::Passthrough, &ToolsConfig::default()).unwrap();
        assert_eq!(backend.name(), "passthrough");
    }
}
