//! Pipeline plan data types.
//!
//! A [`PipelinePlan`] is pure data: an ordered list of stage descriptors
//! with their parameters. The planner builds it and workers consume it.
//! Codec backends turn it into concrete handles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::{Codec, Container, MediaKind, Resolution, ResolutionTier, TargetFormat};

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// The five kinds of pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Demux,
    Decode,
    Filter,
    Encode,
    Mux,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Demux => "demux",
            Self::Decode => "decode",
            Self::Filter => "filter",
            Self::Encode => "encode",
            Self::Mux => "mux",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stream mapping and filters
// ---------------------------------------------------------------------------

/// How one source stream becomes one output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMapping {
    pub input_index: usize,
    pub output_index: usize,
    pub kind: MediaKind,
    pub source_codec: Codec,
    pub codec: Codec,
    /// The stream is carried over without re-encoding.
    pub copy: bool,
    pub bitrate_kbps: Option<u32>,
    pub resolution: Option<Resolution>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// A transformation applied between decode and encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Scale {
        stream: usize,
        from: Resolution,
        to: Resolution,
    },
    Resample {
        stream: usize,
        from: u32,
        to: u32,
    },
    Downmix {
        stream: usize,
        from: u32,
        to: u32,
    },
}

impl FilterSpec {
    /// Source stream index this filter applies to.
    pub fn stream(&self) -> usize {
        match self {
            Self::Scale { stream, .. } | Self::Resample { stream, .. } | Self::Downmix { stream, .. } => {
                *stream
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Scale { .. } => "scale",
            Self::Resample { .. } => "resample",
            Self::Downmix { .. } => "downmix",
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale { stream, from, to } => write!(f, "scale #{stream} {from} -> {to}"),
            Self::Resample { stream, from, to } => write!(f, "resample #{stream} {from} Hz -> {to} Hz"),
            Self::Downmix { stream, from, to } => write!(f, "downmix #{stream} {from} ch -> {to} ch"),
        }
    }
}

/// A source stream the target container cannot carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedStream {
    pub input_index: usize,
    pub kind: MediaKind,
    pub codec: Codec,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Stages and plan
// ---------------------------------------------------------------------------

/// One stage descriptor with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageSpec {
    Demux { container: Container },
    /// Source stream indices to decode, in output order.
    Decode { streams: Vec<usize> },
    Filter(FilterSpec),
    Encode { streams: Vec<StreamMapping> },
    Mux { container: Container },
}

impl StageSpec {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Demux { .. } => StageKind::Demux,
            Self::Decode { .. } => StageKind::Decode,
            Self::Filter(_) => StageKind::Filter,
            Self::Encode { .. } => StageKind::Encode,
            Self::Mux { .. } => StageKind::Mux,
        }
    }
}

/// The conversion recipe for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub target: TargetFormat,
    /// Tier of the source's primary video stream, if it has one.
    pub tier: Option<ResolutionTier>,
    pub stages: Vec<StageSpec>,
    pub dropped: Vec<DroppedStream>,
}

impl PipelinePlan {
    /// Output streams, in output order.
    pub fn streams(&self) -> &[StreamMapping] {
        self.stages
            .iter()
            .find_map(|s| match s {
                StageSpec::Encode { streams } => Some(streams.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterSpec> {
        self.stages.iter().filter_map(|s| match s {
            StageSpec::Filter(f) => Some(f),
            _ => None,
        })
    }

    /// Whether every output stream is carried over unchanged.
    pub fn is_copy_only(&self) -> bool {
        self.streams().iter().all(|s| s.copy)
    }

    /// Container the demux stage reads.
    pub fn source_container(&self) -> Option<Container> {
        self.stages.iter().find_map(|s| match s {
            StageSpec::Demux { container } => Some(*container),
            _ => None,
        })
    }

    /// Whether the output is the source bytes unchanged: same container,
    /// every stream copied, nothing filtered or dropped.
    pub fn is_identity(&self) -> bool {
        self.source_container() == Some(self.target)
            && !self.streams().is_empty()
            && self.is_copy_only()
            && self.filters().next().is_none()
            && self.dropped.is_empty()
    }
}
