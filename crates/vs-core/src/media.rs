//! Media-domain enums: containers, stream kinds, codecs and resolutions.
//!
//! All enums serialize in lowercase and implement `Display` with the same
//! spelling, so the string used on the wire, in the database and in logs is
//! always identical.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Container formats the engine can read and write.
///
/// The same enumerated set names both a probed source container and a
/// requested target format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Avi,
    Mov,
    Webm,
    Mkv,
}

/// A requested output format.
pub type TargetFormat = Container;

impl Container {
    /// Every supported container, in a stable order.
    pub const ALL: [Container; 5] = [
        Container::Mp4,
        Container::Avi,
        Container::Mov,
        Container::Webm,
        Container::Mkv,
    ];

    /// File extension used for outputs in this container (no leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }

    /// Name of the matching ffmpeg muxer.
    pub fn muxer_name(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Webm => "webm",
            Self::Mkv => "matroska",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Container {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Container::ALL
            .into_iter()
            .find(|c| c.extension() == lower)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown target format '{s}' (expected one of mp4, avi, mov, webm, mkv)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Codecs the engine recognizes, across all stream kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    // video
    H264,
    H265,
    Av1,
    Vp8,
    Vp9,
    Mpeg4,
    Prores,
    // audio
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Flac,
    Ac3,
    Pcm,
    // subtitle
    MovText,
    Webvtt,
    Srt,
    Ass,
    Pgs,
}

impl Codec {
    pub fn kind(self) -> MediaKind {
        match self {
            Self::H264 | Self::H265 | Self::Av1 | Self::Vp8 | Self::Vp9 | Self::Mpeg4 | Self::Prores => {
                MediaKind::Video
            }
            Self::Aac | Self::Mp3 | Self::Opus | Self::Vorbis | Self::Flac | Self::Ac3 | Self::Pcm => {
                MediaKind::Audio
            }
            Self::MovText | Self::Webvtt | Self::Srt | Self::Ass | Self::Pgs => MediaKind::Subtitle,
        }
    }

    /// Bitmap subtitles cannot be converted into a text subtitle format.
    pub fn is_bitmap_subtitle(self) -> bool {
        matches!(self, Self::Pgs)
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Av1 => "av1",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Mpeg4 => "mpeg4",
            Self::Prores => "prores",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Flac => "flac",
            Self::Ac3 => "ac3",
            Self::Pcm => "pcm",
            Self::MovText => "mov_text",
            Self::Webvtt => "webvtt",
            Self::Srt => "srt",
            Self::Ass => "ass",
            Self::Pgs => "pgs",
        }
    }

    /// Name of the ffmpeg encoder producing this codec.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Av1 => "libaom-av1",
            Self::Vp8 => "libvpx",
            Self::Vp9 => "libvpx-vp9",
            Self::Mpeg4 => "mpeg4",
            Self::Prores => "prores_ks",
            Self::Aac => "aac",
            Self::Mp3 => "libmp3lame",
            Self::Opus => "libopus",
            Self::Vorbis => "libvorbis",
            Self::Flac => "flac",
            Self::Ac3 => "ac3",
            Self::Pcm => "pcm_s16le",
            Self::MovText => "mov_text",
            Self::Webvtt => "webvtt",
            Self::Srt => "srt",
            Self::Ass => "ass",
            Self::Pgs => "copy",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn tier(&self) -> ResolutionTier {
        ResolutionTier::for_height(self.height)
    }

    /// Scale down to `max_height`, keeping the aspect ratio and rounding both
    /// dimensions down to even values. Never scales up.
    pub fn fit_height(&self, max_height: u32) -> Resolution {
        if self.height <= max_height || self.height == 0 {
            return *self;
        }
        let width = (u64::from(self.width) * u64::from(max_height) / u64::from(self.height)) as u32;
        Resolution::new(even(width), even(max_height))
    }
}

fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid resolution '{s}' (expected WIDTHxHEIGHT)"));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Resolution::new(width, height))
    }
}

// ---------------------------------------------------------------------------
// ResolutionTier
// ---------------------------------------------------------------------------

/// Coarse resolution bucket used to key default encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// Height up to 480 lines.
    Sd,
    /// Up to 720 lines.
    Hd,
    /// Up to 1080 lines.
    FullHd,
    /// Anything taller.
    Uhd,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 4] = [Self::Sd, Self::Hd, Self::FullHd, Self::Uhd];

    pub fn for_height(height: u32) -> Self {
        match height {
            0..=480 => Self::Sd,
            481..=720 => Self::Hd,
            721..=1080 => Self::FullHd,
            _ => Self::Uhd,
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sd => write!(f, "sd"),
            Self::Hd => write!(f, "hd"),
            Self::FullHd => write!(f, "full_hd"),
            Self::Uhd => write!(f, "uhd"),
        }
    }
}
