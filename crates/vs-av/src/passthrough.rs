//! Backend for plans that leave the source untouched.
//!
//! Every handle is an identity transform and the muxer writes the bytes it
//! receives in order, so the output is a byte copy of the source. That is
//! only a correct conversion when the plan keeps the container and copies
//! every stream; any other plan is refused when the handles are opened.
//! It needs no external tool, which makes it useful for development.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use vs_core::{Error, Result};

use crate::backend::{
    CodecBackend, Decoder, Encoder, Filter, Frame, Muxer, Packet, SessionRequest, StageHandles,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBackend;

impl PassthroughBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CodecBackend for PassthroughBackend {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn open(&self, request: &SessionRequest<'_>) -> Result<StageHandles> {
        let plan = request.plan;
        if !plan.is_identity() {
            let from = plan
                .source_container()
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            return Err(Error::IncompatibleFormat(format!(
                "the passthrough backend only copies streams into the same container; \
                 {from} -> {} needs a transcoding backend such as ffmpeg",
                plan.target
            )));
        }

        Ok(StageHandles {
            decoder: Box::new(Identity),
            filters: Vec::new(),
            encoder: Box::new(Identity),
            muxer: Box::new(FileMuxer::create(request.output)?),
        })
    }
}

struct Identity;

impl Decoder for Identity {
    fn decode(&mut self, packet: Packet) -> Result<Vec<Frame>> {
        Ok(vec![Frame {
            seq: packet.seq,
            data: packet.data,
        }])
    }
}

impl Filter for Identity {
    fn apply(&mut self, frame: Frame) -> Result<Vec<Frame>> {
        Ok(vec![frame])
    }
}

impl Encoder for Identity {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>> {
        Ok(vec![Packet {
            seq: frame.seq,
            data: frame.data,
        }])
    }
}

/// Writes packet payloads to a file in arrival order.
pub(crate) struct FileMuxer {
    writer: BufWriter<File>,
}

impl FileMuxer {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl Muxer for FileMuxer {
    fn write(&mut self, packet: Packet) -> Result<()> {
        self.writer.write_all(&packet.data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;
    use vs_core::media::{Codec, Container, MediaKind, Resolution};
    use vs_core::plan::{FilterSpec, PipelinePlan, StageSpec, StreamMapping};

    fn copy_plan(from: Container, to: Container) -> PipelinePlan {
        PipelinePlan {
            target: to,
            tier: None,
            stages: vec![
                StageSpec::Demux { container: from },
                StageSpec::Decode { streams: vec![0] },
                StageSpec::Encode {
                    streams: vec![StreamMapping {
                        input_index: 0,
                        output_index: 0,
                        kind: MediaKind::Video,
                        source_codec: Codec::H264,
                        codec: Codec::H264,
                        copy: true,
                        bitrate_kbps: None,
                        resolution: None,
                        sample_rate: None,
                        channels: None,
                    }],
                },
                StageSpec::Mux { container: to },
            ],
            dropped: vec![],
        }
    }

    fn open(plan: &PipelinePlan, out: &Path) -> Result<StageHandles> {
        PassthroughBackend::new().open(&SessionRequest {
            plan,
            source: Path::new("in.mkv"),
            output: out,
            cancel: CancellationToken::new(),
        })
    }

    #[test]
    fn same_container_copy_carries_bytes_through() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");
        let mut h = open(&copy_plan(Container::Mkv, Container::Mkv), &out).unwrap();
        assert!(h.filters.is_empty());

        for (seq, chunk) in [&b"abc"[..], b"def"].into_iter().enumerate() {
            let packet = Packet {
                seq: seq as u64,
                data: Bytes::copy_from_slice(chunk),
            };
            for frame in h.decoder.decode(packet).unwrap() {
                for p in h.encoder.encode(frame).unwrap() {
                    h.muxer.write(p).unwrap();
                }
            }
        }
        h.muxer.finish().unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"abcdef");
    }

    #[test]
    fn container_change_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let err = open(&copy_plan(Container::Mkv, Container::Mp4), &out).err().unwrap();
        assert!(matches!(err, Error::IncompatibleFormat(_)), "{err}");
        assert!(err.to_string().contains("mkv -> mp4"));
        assert!(!out.exists());
    }

    #[test]
    fn reencode_or_filter_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");

        let mut reencode = copy_plan(Container::Mkv, Container::Mkv);
        if let StageSpec::Encode { streams } = &mut reencode.stages[2] {
            streams[0].codec = Codec::H265;
            streams[0].copy = false;
        }
        assert!(matches!(open(&reencode, &out), Err(Error::IncompatibleFormat(_))));

        let mut scaled = copy_plan(Container::Mkv, Container::Mkv);
        scaled.stages.insert(
            2,
            StageSpec::Filter(FilterSpec::Scale {
                stream: 0,
                from: Resolution::new(3840, 2160),
                to: Resolution::new(1920, 1080),
            }),
        );
        assert!(matches!(open(&scaled, &out), Err(Error::IncompatibleFormat(_))));
        assert!(!out.exists());
    }
}
