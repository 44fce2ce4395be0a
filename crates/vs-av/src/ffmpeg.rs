//! Backend driving the `ffmpeg` CLI.
//!
//! The demuxed source bytes flow through the decode and filter handles
//! unchanged and are fed to an ffmpeg child by the encoder handle. ffmpeg
//! does the actual decoding, filtering and encoding with arguments built
//! from the plan by [`build_args`], and writes the output file itself.
//!
//! Sources in MP4 or MOV keep their index at the end of the file, which
//! ffmpeg cannot demux from a pipe. For those the encoder spools the
//! payload to a temporary file and runs ffmpeg on it at flush.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use vs_core::media::{Container, MediaKind};
use vs_core::plan::{FilterSpec, PipelinePlan, StageSpec};
use vs_core::{Error, Result};

use crate::backend::{
    CodecBackend, Decoder, Encoder, Filter, Frame, Muxer, Packet, SessionRequest, StageHandles,
};
use crate::tools::ToolRegistry;

const TOOL: &str = "ffmpeg";

/// How often a waiting encoder checks for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 4096;

pub struct FfmpegBackend {
    program: PathBuf,
}

impl FfmpegBackend {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_registry(registry: &ToolRegistry) -> Result<Self> {
        Ok(Self::new(registry.require(TOOL)?))
    }
}

impl CodecBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    fn open(&self, request: &SessionRequest<'_>) -> Result<StageHandles> {
        let plan = request.plan;
        let source_container = plan.stages.iter().find_map(|s| match s {
            StageSpec::Demux { container } => Some(*container),
            _ => None,
        });
        let spool = matches!(source_container, Some(Container::Mp4 | Container::Mov));

        let encoder = if spool {
            let dir = request.output.parent().unwrap_or_else(|| Path::new("."));
            let file = tempfile::Builder::new().prefix(".spool-").tempfile_in(dir)?;
            FfmpegEncoder::spooled(self.program.clone(), plan, request.output, file, request.cancel.clone())?
        } else {
            FfmpegEncoder::piped(self.program.clone(), plan, request.output, request.cancel.clone())?
        };

        let filters = plan
            .filters()
            .map(|_| Box::new(Forward) as Box<dyn Filter>)
            .collect();

        Ok(StageHandles {
            decoder: Box::new(Forward),
            filters,
            encoder: Box::new(encoder),
            muxer: Box::new(OutputCheck {
                path: request.output.to_path_buf(),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Argument building
// ---------------------------------------------------------------------------

/// Build the ffmpeg argument list for `plan`, reading from `input` and
/// writing to `output`.
pub fn build_args(plan: &PipelinePlan, input: &str, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i", input]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let streams = plan.streams();

    for s in streams {
        args.push("-map".into());
        args.push(format!("0:{}", s.input_index));
    }

    for s in streams {
        let o = s.output_index;
        args.push(format!("-c:{o}"));
        args.push(if s.copy { "copy".into() } else { s.codec.ffmpeg_encoder().into() });

        if !s.copy {
            if let Some(kbps) = s.bitrate_kbps {
                args.push(format!("-b:{o}"));
                args.push(format!("{kbps}k"));
            }
        }
    }

    for filter in plan.filters() {
        let Some(o) = streams
            .iter()
            .find(|s| s.input_index == filter.stream())
            .map(|s| s.output_index)
        else {
            continue;
        };
        match filter {
            FilterSpec::Scale { to, .. } => {
                args.push(format!("-filter:{o}"));
                args.push(format!("scale={}:{}", to.width, to.height));
            }
            FilterSpec::Resample { to, .. } => {
                args.push(format!("-ar:{o}"));
                args.push(to.to_string());
            }
            FilterSpec::Downmix { to, .. } => {
                args.push(format!("-ac:{o}"));
                args.push(to.to_string());
            }
        }
    }

    if plan.target == Container::Mp4 && streams.iter().any(|s| s.kind == MediaKind::Video) {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }

    args.push("-f".into());
    args.push(plan.target.muxer_name().into());
    args.push(output.to_string_lossy().into_owned());
    args
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Hands data to the next stage untouched; ffmpeg does the real work.
struct Forward;

impl Decoder for Forward {
    fn decode(&mut self, packet: Packet) -> Result<Vec<Frame>> {
        Ok(vec![Frame {
            seq: packet.seq,
            data: packet.data,
        }])
    }
}

impl Filter for Forward {
    fn apply(&mut self, frame: Frame) -> Result<Vec<Frame>> {
        Ok(vec![frame])
    }
}

/// A spawned ffmpeg with its stderr drained on a helper thread.
struct RunningTool {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Arc<Mutex<String>>,
    drain: Option<JoinHandle<()>>,
}

impl RunningTool {
    fn spawn(program: &Path, args: &[String], pipe_stdin: bool) -> Result<Self> {
        tracing::debug!(program = %program.display(), args = ?args, "spawning ffmpeg");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::tool(TOOL, format!("failed to spawn {}: {e}", program.display())))?;

        let stdin = child.stdin.take();
        let stderr = Arc::new(Mutex::new(String::new()));
        let drain = child.stderr.take().map(|mut pipe| {
            let sink = Arc::clone(&stderr);
            std::thread::spawn(move || {
                let mut buf = [0u8; 1024];
                while let Ok(n) = pipe.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    let mut s = sink.lock();
                    s.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if s.len() > STDERR_TAIL {
                        let mut cut = s.len() - STDERR_TAIL;
                        while !s.is_char_boundary(cut) {
                            cut += 1;
                        }
                        s.drain(..cut);
                    }
                }
            })
        });

        Ok(Self {
            child,
            stdin,
            stderr,
            drain,
        })
    }

    fn stderr_tail(&self) -> String {
        self.stderr.lock().trim().to_string()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(Error::tool(TOOL, "stdin already closed"));
        };
        stdin.write_all(data).map_err(|e| {
            // A broken pipe means ffmpeg exited; its stderr says why.
            Error::tool(TOOL, format!("write failed: {e}: {}", self.stderr_tail()))
        })
    }

    /// Close stdin and wait for exit, killing the child on cancellation.
    fn wait(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.stdin.take();

        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                let _ = self.child.kill();
                let _ = self.child.wait();
                return Err(Error::Cancelled);
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if let Some(drain) = self.drain.take() {
            let _ = drain.join();
        }

        if status.success() {
            Ok(())
        } else {
            Err(Error::tool(TOOL, format!("exited with {status}: {}", self.stderr_tail())))
        }
    }
}

impl Drop for RunningTool {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(pid = self.child.id(), "killing ffmpeg");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

enum Input {
    Pipe(RunningTool),
    Spool {
        writer: Option<BufWriter<File>>,
        file: NamedTempFile,
        args: Vec<String>,
        running: Option<RunningTool>,
    },
}

struct FfmpegEncoder {
    program: PathBuf,
    input: Input,
    cancel: CancellationToken,
}

impl FfmpegEncoder {
    fn piped(program: PathBuf, plan: &PipelinePlan, output: &Path, cancel: CancellationToken) -> Result<Self> {
        let args = build_args(plan, "pipe:0", output);
        let tool = RunningTool::spawn(&program, &args, true)?;
        Ok(Self {
            program,
            input: Input::Pipe(tool),
            cancel,
        })
    }

    fn spooled(
        program: PathBuf,
        plan: &PipelinePlan,
        output: &Path,
        file: NamedTempFile,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let args = build_args(plan, &file.path().to_string_lossy(), output);
        let writer = BufWriter::new(file.reopen()?);
        Ok(Self {
            program,
            input: Input::Spool {
                writer: Some(writer),
                file,
                args,
                running: None,
            },
            cancel,
        })
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>> {
        match &mut self.input {
            Input::Pipe(tool) => tool.write(&frame.data)?,
            Input::Spool { writer, .. } => {
                let Some(w) = writer.as_mut() else {
                    return Err(Error::tool(TOOL, "spool already closed"));
                };
                w.write_all(&frame.data)?;
            }
        }
        Ok(Vec::new())
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        match &mut self.input {
            Input::Pipe(tool) => tool.wait(&self.cancel)?,
            Input::Spool {
                writer,
                file,
                args,
                running,
            } => {
                if let Some(mut w) = writer.take() {
                    w.flush()?;
                }
                tracing::debug!(spool = %file.path().display(), "running ffmpeg on spooled input");
                let tool = running.insert(RunningTool::spawn(&self.program, args, false)?);
                tool.wait(&self.cancel)?;
            }
        }
        Ok(Vec::new())
    }
}

/// ffmpeg writes the output itself; the muxer only confirms it is there.
struct OutputCheck {
    path: PathBuf,
}

impl Muxer for OutputCheck {
    fn write(&mut self, _packet: Packet) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(Error::tool(TOOL, format!("empty output at {}", self.path.display()))),
            Err(e) => Err(Error::tool(TOOL, format!("no output at {}: {e}", self.path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vs_core::media::{Codec, Resolution, ResolutionTier};
    use vs_core::plan::StreamMapping;

    fn mapping(input: usize, output: usize, codec: Codec, copy: bool) -> StreamMapping {
        StreamMapping {
            input_index: input,
            output_index: output,
            kind: codec.kind(),
            source_codec: codec,
            codec,
            copy,
            bitrate_kbps: if copy { None } else { Some(2500) },
            resolution: None,
            sample_rate: None,
            channels: None,
        }
    }

    fn plan() -> PipelinePlan {
        PipelinePlan {
            target: Container::Avi,
            tier: Some(ResolutionTier::FullHd),
            stages: vec![
                StageSpec::Demux { container: Container::Mkv },
                StageSpec::Decode { streams: vec![0, 2] },
                StageSpec::Filter(FilterSpec::Scale {
                    stream: 0,
                    from: Resolution::new(1920, 1080),
                    to: Resolution::new(1280, 720),
                }),
                StageSpec::Filter(FilterSpec::Downmix { stream: 2, from: 6, to: 2 }),
                StageSpec::Encode {
                    streams: vec![mapping(0, 0, Codec::Mpeg4, false), mapping(2, 1, Codec::Mp3, true)],
                },
                StageSpec::Mux { container: Container::Avi },
            ],
            dropped: vec![],
        }
    }

    fn pair(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    #[test]
    fn args_map_streams_in_output_order() {
        let args = build_args(&plan(), "pipe:0", Path::new("/out/x.avi"));
        let maps: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].clone())
            .collect();
        assert_eq!(maps, ["0:0", "0:2"]);
        assert_eq!(pair(&args, "-i").as_deref(), Some("pipe:0"));
    }

    #[test]
    fn args_carry_codecs_bitrates_and_filters() {
        let args = build_args(&plan(), "pipe:0", Path::new("/out/x.avi"));
        assert_eq!(pair(&args, "-c:0").as_deref(), Some("mpeg4"));
        assert_eq!(pair(&args, "-b:0").as_deref(), Some("2500k"));
        assert_eq!(pair(&args, "-c:1").as_deref(), Some("copy"));
        assert_eq!(pair(&args, "-b:1"), None);
        assert_eq!(pair(&args, "-filter:0").as_deref(), Some("scale=1280:720"));
        assert_eq!(pair(&args, "-ac:1").as_deref(), Some("2"));
        assert_eq!(pair(&args, "-f").as_deref(), Some("avi"));
        assert_eq!(args.last().map(String::as_str), Some("/out/x.avi"));
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn mkv_target_uses_matroska_muxer() {
        let mut p = plan();
        p.target = Container::Mkv;
        let args = build_args(&p, "in.spool", Path::new("o.mkv"));
        assert_eq!(pair(&args, "-f").as_deref(), Some("matroska"));
    }

    #[test]
    fn missing_output_fails_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut check = OutputCheck {
            path: dir.path().join("nothing.mp4"),
        };
        assert!(matches!(check.finish(), Err(Error::Tool { .. })));

        std::fs::write(&check.path, b"x").unwrap();
        assert!(check.finish().is_ok());
    }

    #[test]
    fn missing_binary_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.avi");
        let p = plan();
        let request = SessionRequest {
            plan: &p,
            source: Path::new("in.mkv"),
            output: &out,
            cancel: CancellationToken::new(),
        };
        let backend = FfmpegBackend::new("/nonexistent/ffmpeg-xyz");
        let err = backend.open(&request).err().unwrap();
        assert!(matches!(err, Error::Tool { .. }));
    }
}
