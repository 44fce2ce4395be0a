//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds a scheduler over an in-memory store with a
//! [`FakeProber`] and a [`ScriptedBackend`], so no media tooling is needed.
//! The source file name picks the behavior: `hold*` blocks in the encoder
//! until the gate opens, `stubborn*` also ignores cancellation, `panic*`
//! crashes the encoder, `pgs*` probes as a bitmap-subtitle-only file and
//! anything not named after a container fails to probe.

#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vs_av::{
    CodecBackend, Decoder, Encoder, Filter, Frame, Muxer, Packet, SessionRequest, StageHandles,
};
use vs_core::config::{Config, EngineConfig};
use vs_core::events::EventBus;
use vs_core::{Codec, Container, Error, Job, JobId, JobOptions, Resolution, Result};
use vs_db::{JobStore, MemoryJobStore};
use vs_pipeline::{Planner, TranscodeWorker};
use vs_probe::{MediaDescriptor, Prober, StreamDescriptor};
use vs_scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Shared switch that held encoders wait on.
#[derive(Default)]
pub struct Gate {
    open: AtomicBool,
    entered: AtomicUsize,
}

impl Gate {
    pub fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of encoders that have reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// FakeProber
// ---------------------------------------------------------------------------

/// Describes a 1080p h264 + stereo aac source in the container named by the
/// file extension.
pub struct FakeProber;

impl Prober for FakeProber {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, path: &Path) -> bool {
        container_of(path).is_some()
    }

    fn probe(&self, path: &Path) -> Result<MediaDescriptor> {
        let container = container_of(path)
            .ok_or_else(|| Error::UnsupportedContainer(format!("{} has no known signature", path.display())))?;
        let file_size = std::fs::metadata(path)?.len();

        let streams = if stem(path).starts_with("pgs") {
            vec![StreamDescriptor::new(0, Codec::Pgs)]
        } else {
            vec![
                StreamDescriptor::video(0, Codec::H264, Resolution::new(1920, 1080)),
                StreamDescriptor::audio(1, Codec::Aac, 48_000, 2),
            ]
        };

        Ok(MediaDescriptor {
            source: path.to_path_buf(),
            file_size,
            container,
            duration: Some(Duration::from_secs(10)),
            bitrate_kbps: None,
            streams,
        })
    }
}

fn container_of(path: &Path) -> Option<Container> {
    path.extension()?.to_str()?.parse().ok()
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Script {
    Pass,
    Hold,
    Stubborn,
    Panic,
}

/// Stand-in codec: every stage relays the payload and the muxer writes it
/// to the staging file. The encoder's behavior is chosen by the source name.
pub struct ScriptedBackend {
    gate: Arc<Gate>,
}

impl CodecBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self, request: &SessionRequest<'_>) -> Result<StageHandles> {
        let name = stem(request.source);
        let script = if name.starts_with("hold") {
            Script::Hold
        } else if name.starts_with("stubborn") {
            Script::Stubborn
        } else if name.starts_with("panic") {
            Script::Panic
        } else {
            Script::Pass
        };

        Ok(StageHandles {
            decoder: Box::new(Relay),
            filters: request.plan.filters().map(|_| Box::new(Relay) as Box<dyn Filter>).collect(),
            encoder: Box::new(ScriptedEncoder {
                script,
                gate: Arc::clone(&self.gate),
                cancel: request.cancel.clone(),
                waited: false,
            }),
            muxer: Box::new(FileSink(BufWriter::new(File::create(request.output)?))),
        })
    }
}

struct Relay;

impl Decoder for Relay {
    fn decode(&mut self, packet: Packet) -> Result<Vec<Frame>> {
        Ok(vec![Frame {
            seq: packet.seq,
            data: packet.data,
        }])
    }
}

impl Filter for Relay {
    fn apply(&mut self, frame: Frame) -> Result<Vec<Frame>> {
        Ok(vec![frame])
    }
}

struct FileSink(BufWriter<File>);

impl Muxer for FileSink {
    fn write(&mut self, packet: Packet) -> Result<()> {
        self.0.write_all(&packet.data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.0.flush()?;
        Ok(())
    }
}

struct ScriptedEncoder {
    script: Script,
    gate: Arc<Gate>,
    cancel: CancellationToken,
    waited: bool,
}

impl Encoder for ScriptedEncoder {
    fn encode(&mut self, frame: Frame) -> Result<Vec<Packet>> {
        match self.script {
            Script::Pass => {}
            Script::Panic => panic!("encoder crashed"),
            Script::Hold | Script::Stubborn if !self.waited => {
                self.waited = true;
                self.gate.entered.fetch_add(1, Ordering::SeqCst);
                while !self.gate.is_open() {
                    if matches!(self.script, Script::Hold) && self.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
            Script::Hold | Script::Stubborn => {}
        }
        Ok(vec![Packet {
            seq: frame.seq,
            data: frame.data,
        }])
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub dir: TempDir,
    pub scheduler: Scheduler,
    pub gate: Arc<Gate>,
    pub shutdown: CancellationToken,
    pub config: Config,
}

impl TestHarness {
    /// Harness with a concurrency cap of 2.
    pub fn new() -> Self {
        Self::with_engine(|_| {})
    }

    /// Harness whose engine settings are adjusted by `tweak`.
    pub fn with_engine(tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        Self::build(Arc::new(MemoryJobStore::new()), tweak)
    }

    /// Harness over an existing store, such as one holding records left by
    /// an earlier run.
    pub fn with_store(store: Arc<dyn JobStore>) -> Self {
        Self::build(store, |_| {})
    }

    fn build(store: Arc<dyn JobStore>, tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        config.engine.concurrency = Some(2);
        config.engine.output_dir = dir.path().join("out");
        tweak(&mut config.engine);

        let gate = Arc::new(Gate::default());
        let worker = TranscodeWorker::new(
            Arc::new(FakeProber),
            Arc::new(Planner::new(&config.planner)),
            Arc::new(ScriptedBackend {
                gate: Arc::clone(&gate),
            }),
            config.engine.clone(),
        );
        let scheduler = Scheduler::new(
            store,
            Arc::new(worker),
            Arc::new(EventBus::default()),
        );

        Self {
            dir,
            scheduler,
            gate,
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Start the dispatch loop. It stops when the harness is dropped.
    pub fn start(&self) {
        self.scheduler.start(self.shutdown.clone());
    }

    /// Serve the HTTP API on a random port and start the dispatch loop.
    pub async fn with_server(self) -> (Self, SocketAddr) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let ctx = vs_server::AppContext::from_scheduler(self.config.clone(), self.scheduler.clone());
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            vs_server::serve(ctx, listener, cancel).await.ok();
        });

        (self, addr)
    }

    /// Write a source file of `size` bytes.
    pub fn source(&self, name: &str, size: usize) -> PathBuf {
        let path = self.dir.path().join(name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).expect("failed to write source");
        path
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Files currently in the output directory, including partials.
    pub fn output_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.output_dir()) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn submit(&self, source: &Path, target: Container) -> Job {
        self.scheduler
            .submit(source, target, JobOptions::default())
            .expect("submit failed")
    }

    /// Wait for `id` to finish, failing the test after 10 seconds.
    pub async fn finish(&self, id: JobId) -> Job {
        tokio::time::timeout(Duration::from_secs(10), self.scheduler.wait(id))
            .await
            .expect("job did not finish in time")
            .expect("wait failed")
    }

    /// Poll until `cond` holds, failing the test after 5 seconds.
    pub async fn until(&self, what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.gate.release();
        self.shutdown.cancel();
    }
}
