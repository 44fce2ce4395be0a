//! Probe result types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vs_core::{Codec, Container, MediaKind, Resolution};

/// Everything the planner needs to know about a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub source: PathBuf,
    /// Total source size in bytes. Progress is measured against this.
    pub file_size: u64,
    pub container: Container,
    pub duration: Option<Duration>,
    /// Overall bitrate derived from size and duration.
    pub bitrate_kbps: Option<u32>,
    /// Recognized streams in container order.
    pub streams: Vec<StreamDescriptor>,
}

impl MediaDescriptor {
    pub fn streams_of(&self, kind: MediaKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    /// The first video stream, if any.
    pub fn primary_video(&self) -> Option<&StreamDescriptor> {
        self.streams_of(MediaKind::Video).next()
    }

    /// Fill in `bitrate_kbps` from size and duration.
    pub(crate) fn with_derived_bitrate(mut self) -> Self {
        if self.bitrate_kbps.is_none() {
            self.bitrate_kbps = self
                .duration
                .filter(|d| !d.is_zero())
                .map(|d| (self.file_size as f64 * 8.0 / d.as_secs_f64() / 1000.0).round() as u32);
        }
        self
    }
}

/// One elementary stream inside the source container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Position of the stream in the source container.
    pub index: usize,
    pub kind: MediaKind,
    pub codec: Codec,
    pub duration: Option<Duration>,
    pub bitrate_kbps: Option<u32>,
    /// Video only.
    pub resolution: Option<Resolution>,
    /// Video only.
    pub frame_rate: Option<f64>,
    /// Audio only.
    pub sample_rate: Option<u32>,
    /// Audio only.
    pub channels: Option<u32>,
    pub language: Option<String>,
}

impl StreamDescriptor {
    pub fn new(index: usize, codec: Codec) -> Self {
        Self {
            index,
            kind: codec.kind(),
            codec,
            duration: None,
            bitrate_kbps: None,
            resolution: None,
            frame_rate: None,
            sample_rate: None,
            channels: None,
            language: None,
        }
    }

    pub fn video(index: usize, codec: Codec, resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            ..Self::new(index, codec)
        }
    }

    pub fn audio(index: usize, codec: Codec, sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            ..Self::new(index, codec)
        }
    }
}
