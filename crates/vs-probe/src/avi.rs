//! AVI (RIFF) header walker.
//!
//! Only the `hdrl` list at the front of the file is read: the main `avih`
//! header and one `strl` list per stream (`strh` + `strf`). Movie data is
//! never touched.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use vs_core::{Codec, Container, Error, Resolution, Result};

use crate::types::{MediaDescriptor, StreamDescriptor};

/// Upper bound on the `hdrl` list size we are willing to buffer.
const MAX_HDRL_LEN: usize = 4 * 1024 * 1024;

type FourCc = [u8; 4];

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptHeader(format!("AVI: {}", msg.into()))
}

fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn fourcc(b: &[u8], at: usize) -> FourCc {
    [b[at], b[at + 1], b[at + 2], b[at + 3]]
}

fn show(cc: &FourCc) -> String {
    String::from_utf8_lossy(cc).into_owned()
}

/// Split a buffer into RIFF chunks `(id, body)`, honoring word padding.
fn chunks(mut buf: &[u8]) -> Result<Vec<(FourCc, &[u8])>> {
    let mut out = Vec::new();
    while buf.len() >= 8 {
        let id = fourcc(buf, 0);
        let size = le32(buf, 4) as usize;
        let end = 8usize
            .checked_add(size)
            .ok_or_else(|| corrupt("chunk size overflow"))?;
        let body = buf
            .get(8..end)
            .ok_or_else(|| corrupt(format!("chunk '{}' overruns its parent", show(&id))))?;
        out.push((id, body));
        buf = buf.get(end + (size & 1)..).unwrap_or(&[]);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Header structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MainHeader {
    micros_per_frame: u32,
    total_frames: u32,
}

#[derive(Debug)]
struct StreamHeader {
    kind: FourCc,
    handler: FourCc,
    scale: u32,
    rate: u32,
    length: u32,
}

impl StreamHeader {
    fn duration(&self) -> Option<Duration> {
        if self.rate == 0 || self.length == 0 {
            return None;
        }
        let secs = f64::from(self.length) * f64::from(self.scale) / f64::from(self.rate);
        Duration::try_from_secs_f64(secs).ok()
    }

    fn frame_rate(&self) -> Option<f64> {
        (self.scale > 0 && self.rate > 0).then(|| f64::from(self.rate) / f64::from(self.scale))
    }
}

fn parse_avih(body: &[u8]) -> Result<MainHeader> {
    if body.len() < 40 {
        return Err(corrupt("avih shorter than 40 bytes"));
    }
    Ok(MainHeader {
        micros_per_frame: le32(body, 0),
        total_frames: le32(body, 16),
    })
}

fn parse_strh(body: &[u8]) -> Result<StreamHeader> {
    if body.len() < 36 {
        return Err(corrupt("strh shorter than 36 bytes"));
    }
    Ok(StreamHeader {
        kind: fourcc(body, 0),
        handler: fourcc(body, 4),
        scale: le32(body, 20),
        rate: le32(body, 24),
        length: le32(body, 32),
    })
}

// ---------------------------------------------------------------------------
// Codec mapping
// ---------------------------------------------------------------------------

fn video_codec(cc: &FourCc) -> Option<Codec> {
    match &cc.to_ascii_uppercase()[..] {
        b"H264" | b"X264" | b"AVC1" => Some(Codec::H264),
        b"HEVC" | b"H265" | b"X265" | b"HVC1" => Some(Codec::H265),
        b"XVID" | b"DIVX" | b"DX50" | b"FMP4" | b"MP4V" => Some(Codec::Mpeg4),
        b"VP80" => Some(Codec::Vp8),
        b"VP90" => Some(Codec::Vp9),
        b"AV01" => Some(Codec::Av1),
        _ => None,
    }
}

fn audio_codec(format_tag: u16) -> Option<Codec> {
    match format_tag {
        0x0001 => Some(Codec::Pcm),
        0x0055 => Some(Codec::Mp3),
        0x00FF | 0x1610 | 0x706D => Some(Codec::Aac),
        0x2000 => Some(Codec::Ac3),
        0xF1AC => Some(Codec::Flac),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Stream lists
// ---------------------------------------------------------------------------

fn parse_strl(index: usize, body: &[u8]) -> Result<Option<StreamDescriptor>> {
    let mut header = None;
    let mut format = None;
    for (id, chunk) in chunks(body)? {
        match &id {
            b"strh" => header = Some(parse_strh(chunk)?),
            b"strf" => format = Some(chunk),
            _ => {}
        }
    }
    let header = header.ok_or_else(|| corrupt(format!("stream {index} has no strh")))?;
    let format = format.ok_or_else(|| corrupt(format!("stream {index} has no strf")))?;

    let stream = match &header.kind {
        b"vids" => {
            if format.len() < 20 {
                return Err(corrupt(format!("stream {index} strf too short for BITMAPINFOHEADER")));
            }
            let compression = fourcc(format, 16);
            let Some(codec) = video_codec(&compression).or_else(|| video_codec(&header.handler)) else {
                tracing::debug!(stream = index, fourcc = %show(&compression), "skipping unsupported AVI video stream");
                return Ok(None);
            };
            let width = (le32(format, 4) as i32).unsigned_abs();
            // Negative height means a top-down bitmap.
            let height = (le32(format, 8) as i32).unsigned_abs();
            StreamDescriptor {
                duration: header.duration(),
                frame_rate: header.frame_rate(),
                ..StreamDescriptor::video(index, codec, Resolution::new(width, height))
            }
        }
        b"auds" => {
            if format.len() < 16 {
                return Err(corrupt(format!("stream {index} strf too short for WAVEFORMATEX")));
            }
            let tag = le16(format, 0);
            let Some(codec) = audio_codec(tag) else {
                tracing::debug!(stream = index, format_tag = tag, "skipping unsupported AVI audio stream");
                return Ok(None);
            };
            let channels = u32::from(le16(format, 2));
            let sample_rate = le32(format, 4);
            let bitrate_kbps = match le32(format, 8) {
                0 => None,
                avg_bytes => Some(
                    u32::try_from(u64::from(avg_bytes) * 8 / 1000)
                        .map_err(|_| corrupt(format!("stream {index} byte rate {avg_bytes} out of range")))?,
                ),
            };
            StreamDescriptor {
                duration: header.duration(),
                bitrate_kbps,
                ..StreamDescriptor::audio(index, codec, sample_rate, channels)
            }
        }
        b"txts" => StreamDescriptor {
            duration: header.duration(),
            ..StreamDescriptor::new(index, Codec::Srt)
        },
        other => {
            tracing::debug!(stream = index, kind = %show(other), "skipping AVI stream of unknown kind");
            return Ok(None);
        }
    };
    Ok(Some(stream))
}

/// Parse the body of the `hdrl` list (everything after the `hdrl` tag).
fn parse_hdrl(body: &[u8]) -> Result<(MainHeader, Vec<StreamDescriptor>)> {
    let mut main = None;
    let mut streams = Vec::new();
    let mut index = 0;

    for (id, chunk) in chunks(body)? {
        match &id {
            b"avih" => main = Some(parse_avih(chunk)?),
            b"LIST" if chunk.len() >= 4 && &chunk[0..4] == b"strl" => {
                if let Some(stream) = parse_strl(index, &chunk[4..])? {
                    streams.push(stream);
                }
                index += 1;
            }
            _ => {}
        }
    }

    let main = main.ok_or_else(|| corrupt("missing avih header"))?;
    Ok((main, streams))
}

/// Probe an AVI file.
pub(crate) fn probe_avi(path: &Path) -> Result<MediaDescriptor> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut head = [0u8; 24];
    reader
        .read_exact(&mut head)
        .map_err(|e| corrupt(format!("truncated RIFF header: {e}")))?;
    if &head[12..16] != b"LIST" || &head[20..24] != b"hdrl" {
        return Err(corrupt("first chunk is not the hdrl list"));
    }

    let list_len = le32(&head, 16) as usize;
    if !(4..=MAX_HDRL_LEN).contains(&list_len) {
        return Err(corrupt(format!("implausible hdrl size {list_len}")));
    }
    let mut body = vec![0u8; list_len - 4];
    reader
        .read_exact(&mut body)
        .map_err(|e| corrupt(format!("truncated hdrl list: {e}")))?;

    let (main, streams) = parse_hdrl(&body)?;

    let duration = (main.micros_per_frame > 0 && main.total_frames > 0)
        .then(|| Duration::from_micros(u64::from(main.micros_per_frame) * u64::from(main.total_frames)))
        .or_else(|| streams.iter().filter_map(|s| s.duration).max());

    Ok(MediaDescriptor {
        source: path.to_path_buf(),
        file_size,
        container: Container::Avi,
        duration,
        bitrate_kbps: None,
        streams,
    }
    .with_derived_bitrate())
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Builders for synthetic AVI headers.

    pub fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend((body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    pub fn list(kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
        let mut body = kind.to_vec();
        for c in children {
            body.extend_from_slice(c);
        }
        chunk(b"LIST", &body)
    }

    pub fn avih(micros_per_frame: u32, total_frames: u32, streams: u32) -> Vec<u8> {
        let mut b = vec![0u8; 56];
        b[0..4].copy_from_slice(&micros_per_frame.to_le_bytes());
        b[16..20].copy_from_slice(&total_frames.to_le_bytes());
        b[24..28].copy_from_slice(&streams.to_le_bytes());
        chunk(b"avih", &b)
    }

    pub fn strh(kind: &[u8; 4], handler: &[u8; 4], scale: u32, rate: u32, length: u32) -> Vec<u8> {
        let mut b = vec![0u8; 56];
        b[0..4].copy_from_slice(kind);
        b[4..8].copy_from_slice(handler);
        b[20..24].copy_from_slice(&scale.to_le_bytes());
        b[24..28].copy_from_slice(&rate.to_le_bytes());
        b[32..36].copy_from_slice(&length.to_le_bytes());
        chunk(b"strh", &b)
    }

    pub fn video_strf(width: i32, height: i32, compression: &[u8; 4]) -> Vec<u8> {
        let mut b = vec![0u8; 40];
        b[0..4].copy_from_slice(&40u32.to_le_bytes());
        b[4..8].copy_from_slice(&width.to_le_bytes());
        b[8..12].copy_from_slice(&height.to_le_bytes());
        b[16..20].copy_from_slice(compression);
        chunk(b"strf", &b)
    }

    pub fn audio_strf(tag: u16, channels: u16, rate: u32, avg_bytes: u32) -> Vec<u8> {
        let mut b = vec![0u8; 18];
        b[0..2].copy_from_slice(&tag.to_le_bytes());
        b[2..4].copy_from_slice(&channels.to_le_bytes());
        b[4..8].copy_from_slice(&rate.to_le_bytes());
        b[8..12].copy_from_slice(&avg_bytes.to_le_bytes());
        chunk(b"strf", &b)
    }

    /// A complete file: RIFF header, hdrl list, and a small movi list.
    pub fn file(hdrl_children: &[Vec<u8>]) -> Vec<u8> {
        let hdrl = list(b"hdrl", hdrl_children);
        let movi = list(b"movi", &[chunk(b"00dc", &[0xAB; 32])]);
        let mut body = b"AVI ".to_vec();
        body.extend(hdrl);
        body.extend(movi);
        chunk(b"RIFF", &body)
    }

    /// 10 s of 640x480 XviD at 25 fps plus 2-channel 44.1 kHz MP3.
    pub fn sample() -> Vec<u8> {
        file(&[
            avih(40_000, 250, 2),
            list(
                b"strl",
                &[strh(b"vids", b"xvid", 1, 25, 250), video_strf(640, -480, b"XVID")],
            ),
            list(
                b"strl",
                &[strh(b"auds", b"\0\0\0\0", 1152, 44_100, 383), audio_strf(0x0055, 2, 44_100, 16_000)],
            ),
        ])
    }
}
