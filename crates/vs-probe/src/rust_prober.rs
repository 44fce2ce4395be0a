//! Pure-Rust prober.
//!
//! Uses the `matroska` crate for MKV/WebM, `mp4parse` for MP4/MOV and a
//! built-in RIFF walker for AVI.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use vs_core::{Codec, Container, Error, Resolution, Result};

use crate::avi;
use crate::prober::Prober;
use crate::signature::sniff_container;
use crate::types::{MediaDescriptor, StreamDescriptor};

/// A [`Prober`] that needs no external tools.
#[derive(Debug, Default)]
pub struct RustProber;

impl RustProber {
    pub fn new() -> Self {
        Self
    }
}

impl Prober for RustProber {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn supports(&self, path: &Path) -> bool {
        sniff_container(path).is_ok()
    }

    fn probe(&self, path: &Path) -> Result<MediaDescriptor> {
        let container = sniff_container(path)?;
        let descriptor = match container {
            Container::Mkv | Container::Webm => probe_matroska(path, container)?,
            Container::Mp4 | Container::Mov => probe_mp4(path, container)?,
            Container::Avi => avi::probe_avi(path)?,
        };

        if descriptor.streams.is_empty() {
            return Err(Error::NoDecodableStreams(format!(
                "{} contains no video, audio or subtitle stream with a supported codec",
                path.display()
            )));
        }

        tracing::debug!(
            path = %path.display(),
            container = %descriptor.container,
            streams = descriptor.streams.len(),
            "probed source"
        );
        Ok(descriptor)
    }
}

// ---------------------------------------------------------------------------
// Matroska / WebM
// ---------------------------------------------------------------------------

fn probe_matroska(path: &Path, container: Container) -> Result<MediaDescriptor> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mkv = matroska::Matroska::open(BufReader::new(file))
        .map_err(|e| Error::CorruptHeader(format!("Matroska parse error: {e}")))?;

    let duration = mkv.info.duration;
    let mut streams = Vec::new();

    for (index, track) in mkv.tracks.iter().enumerate() {
        let language = track.language.as_ref().map(|l| l.to_string());
        let stream = match &track.settings {
            matroska::Settings::Video(video) => {
                let Some(codec) = mkv_video_codec(&track.codec_id) else {
                    tracing::debug!(track = index, codec_id = %track.codec_id, "skipping unsupported video track");
                    continue;
                };
                let frame_rate = track
                    .default_duration
                    .filter(|d| d.as_secs_f64() > 0.0)
                    .map(|d| 1.0 / d.as_secs_f64());
                StreamDescriptor {
                    frame_rate,
                    ..StreamDescriptor::video(
                        index,
                        codec,
                        Resolution::new(video.pixel_width as u32, video.pixel_height as u32),
                    )
                }
            }
            matroska::Settings::Audio(audio) => {
                let Some(codec) = mkv_audio_codec(&track.codec_id) else {
                    tracing::debug!(track = index, codec_id = %track.codec_id, "skipping unsupported audio track");
                    continue;
                };
                StreamDescriptor::audio(index, codec, audio.sample_rate as u32, audio.channels as u32)
            }
            matroska::Settings::None if track.tracktype == matroska::Tracktype::Subtitle => {
                let Some(codec) = mkv_subtitle_codec(&track.codec_id) else {
                    tracing::debug!(track = index, codec_id = %track.codec_id, "skipping unsupported subtitle track");
                    continue;
                };
                StreamDescriptor::new(index, codec)
            }
            matroska::Settings::None => continue,
        };

        streams.push(StreamDescriptor {
            duration,
            language,
            ..stream
        });
    }

    Ok(MediaDescriptor {
        source: path.to_path_buf(),
        file_size,
        container,
        duration,
        bitrate_kbps: None,
        streams,
    }
    .with_derived_bitrate())
}

fn mkv_video_codec(codec_id: &str) -> Option<Codec> {
    match codec_id {
        "V_MPEG4/ISO/AVC" => Some(Codec::H264),
        "V_MPEGH/ISO/HEVC" => Some(Codec::H265),
        "V_AV1" => Some(Codec::Av1),
        "V_VP8" => Some(Codec::Vp8),
        "V_VP9" => Some(Codec::Vp9),
        "V_PRORES" => Some(Codec::Prores),
        other if other.starts_with("V_MPEG4/ISO/") => Some(Codec::Mpeg4),
        _ => None,
    }
}

fn mkv_audio_codec(codec_id: &str) -> Option<Codec> {
    match codec_id {
        "A_MPEG/L3" => Some(Codec::Mp3),
        "A_OPUS" => Some(Codec::Opus),
        "A_VORBIS" => Some(Codec::Vorbis),
        "A_FLAC" => Some(Codec::Flac),
        "A_AC3" => Some(Codec::Ac3),
        other if other.starts_with("A_AAC") => Some(Codec::Aac),
        other if other.starts_with("A_PCM/") => Some(Codec::Pcm),
        _ => None,
    }
}

fn mkv_subtitle_codec(codec_id: &str) -> Option<Codec> {
    match codec_id {
        "S_TEXT/UTF8" => Some(Codec::Srt),
        "S_TEXT/SSA" | "S_TEXT/ASS" => Some(Codec::Ass),
        "S_TEXT/WEBVTT" => Some(Codec::Webvtt),
        "S_HDMV/PGS" => Some(Codec::Pgs),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// MP4 / MOV
// ---------------------------------------------------------------------------

fn probe_mp4(path: &Path, container: Container) -> Result<MediaDescriptor> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut reader = BufReader::new(file);
    let context = mp4parse::read_mp4(&mut reader)
        .map_err(|e| Error::CorruptHeader(format!("MP4 parse error: {e:?}")))?;

    let mut streams = Vec::new();
    for (index, track) in context.tracks.iter().enumerate() {
        let stream = match track.track_type {
            mp4parse::TrackType::Video => mp4_video_stream(index, track),
            mp4parse::TrackType::Audio => mp4_audio_stream(index, track),
            mp4parse::TrackType::Metadata => mp4_subtitle_stream(index, track),
            _ => None,
        };
        match stream {
            Some(s) => streams.push(StreamDescriptor {
                duration: mp4_track_duration(&context, track),
                ..s
            }),
            None => tracing::debug!(track = index, "skipping unsupported MP4 track"),
        }
    }

    let duration = streams.iter().filter_map(|s| s.duration).max();

    Ok(MediaDescriptor {
        source: path.to_path_buf(),
        file_size,
        container,
        duration,
        bitrate_kbps: None,
        streams,
    }
    .with_derived_bitrate())
}

fn mp4_track_duration(context: &mp4parse::MediaContext, track: &mp4parse::Track) -> Option<Duration> {
    let dur = track.duration?;
    let scale = track
        .timescale
        .map(|s| s.0)
        .or_else(|| context.timescale.map(|s| s.0))?;
    if scale == 0 {
        return None;
    }
    Some(Duration::from_millis(dur.0.saturating_mul(1000) / scale))
}

fn first_sample_entry(track: &mp4parse::Track) -> Option<&mp4parse::SampleEntry> {
    track.stsd.as_ref()?.descriptions.first()
}

fn mp4_video_stream(index: usize, track: &mp4parse::Track) -> Option<StreamDescriptor> {
    let mp4parse::SampleEntry::Video(ve) = first_sample_entry(track)? else {
        return None;
    };
    let codec = match &ve.codec_specific {
        mp4parse::VideoCodecSpecific::AVCConfig(_) => Codec::H264,
        mp4parse::VideoCodecSpecific::AV1Config(_) => Codec::Av1,
        mp4parse::VideoCodecSpecific::VPxConfig(_) => Codec::Vp9,
        mp4parse::VideoCodecSpecific::ESDSConfig(_) => Codec::Mpeg4,
        _ => return None,
    };
    Some(StreamDescriptor::video(
        index,
        codec,
        Resolution::new(u32::from(ve.width), u32::from(ve.height)),
    ))
}

fn mp4_audio_stream(index: usize, track: &mp4parse::Track) -> Option<StreamDescriptor> {
    let mp4parse::SampleEntry::Audio(ae) = first_sample_entry(track)? else {
        return None;
    };
    let codec = match &ae.codec_specific {
        mp4parse::AudioCodecSpecific::ES_Descriptor(_) => Codec::Aac,
        mp4parse::AudioCodecSpecific::FLACSpecificBox(_) => Codec::Flac,
        mp4parse::AudioCodecSpecific::OpusSpecificBox(_) => Codec::Opus,
        mp4parse::AudioCodecSpecific::MP3 => Codec::Mp3,
        mp4parse::AudioCodecSpecific::LPCM => Codec::Pcm,
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(StreamDescriptor::audio(index, codec, ae.samplerate as u32, ae.channelcount))
}

fn mp4_subtitle_stream(index: usize, track: &mp4parse::Track) -> Option<StreamDescriptor> {
    first_sample_entry(track)?;
    Some(StreamDescriptor::new(index, Codec::MovText))
}
