//! Transcode worker: probes, plans and runs one job.
//!
//! The five stages run on their own blocking threads and hand work along
//! bounded queues, so a slow consumer suspends its producer instead of
//! letting memory grow. Every stage checks for cancellation between units
//! of work. The first stage to fail cancels an internal abort token and the
//! others unwind through their closed queues; stage handles are released
//! as each thread returns.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use vs_av::{CodecBackend, Decoder, Encoder, Filter, Frame, Muxer, OutputStaging, Packet, SessionRequest, StageHandles};
use vs_core::config::EngineConfig;
use vs_core::plan::StageKind;
use vs_core::{Error, Job, JobFailure, Result};
use vs_probe::Prober;

use crate::context::{ProgressSender, WorkerContext};
use crate::planner::Planner;
use crate::progress::ProgressThrottle;

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Succeeded { output: PathBuf },
    Failed(JobFailure),
    Cancelled,
}

pub struct TranscodeWorker {
    prober: Arc<dyn Prober>,
    planner: Arc<Planner>,
    backend: Arc<dyn CodecBackend>,
    config: EngineConfig,
}

impl TranscodeWorker {
    pub fn new(
        prober: Arc<dyn Prober>,
        planner: Arc<Planner>,
        backend: Arc<dyn CodecBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            prober,
            planner,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// `<output_dir>/<source stem>-<short id>.<ext>`
    pub fn output_path(&self, job: &Job) -> PathBuf {
        let stem = job
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        self.config
            .output_dir
            .join(format!("{stem}-{}.{}", job.id.short(), job.target.extension()))
    }

    /// Run `job` to completion. Never panics on job errors; a panicking
    /// stage is reported as a lost worker.
    pub async fn execute(&self, job: &Job, ctx: WorkerContext) -> WorkerOutcome {
        let span = tracing::info_span!("job", id = %job.id, target = %job.target);

        match self.run(job, &ctx).instrument(span).await {
            Ok(output) => {
                tracing::info!(job_id = %job.id, output = %output.display(), "job succeeded");
                WorkerOutcome::Succeeded { output }
            }
            Err(_) if ctx.cancellation.is_cancelled() => {
                tracing::info!(job_id = %job.id, "job cancelled");
                WorkerOutcome::Cancelled
            }
            Err(e) => {
                let failure = e.failure();
                tracing::warn!(job_id = %job.id, "job failed: {failure}");
                WorkerOutcome::Failed(failure)
            }
        }
    }

    async fn run(&self, job: &Job, ctx: &WorkerContext) -> Result<PathBuf> {
        let prober = Arc::clone(&self.prober);
        let source = job.source.clone();
        let media = tokio::task::spawn_blocking(move || prober.probe(&source))
            .await
            .map_err(|e| Error::WorkerLost(format!("probe panicked: {e}")))?
            .map_err(|e| match e {
                Error::Io { .. } => Error::stage("probe", e),
                other => other,
            })?;
        tracing::debug!(
            job_id = %job.id,
            container = %media.container,
            streams = media.streams.len(),
            size = media.file_size,
            "probed source"
        );
        ctx.check_cancelled()?;

        let plan = self.planner.plan(&media, job.target, &job.options)?;
        ctx.check_cancelled()?;

        let staging = OutputStaging::create(self.output_path(job))?;
        let abort = ctx.cancellation.child_token();
        let handles = self.backend.open(&SessionRequest {
            plan: &plan,
            source: &job.source,
            output: staging.partial(),
            cancel: abort.clone(),
        })?;

        let run = StageRun {
            source: job.source.clone(),
            total_bytes: media.file_size,
            chunk_size: self.config.chunk_size(),
            capacity: self.config.buffer_capacity(),
            progress_interval: self.config.progress_interval(),
            progress: Arc::clone(&ctx.progress),
            abort,
        };
        run.execute(handles).await?;

        // A cancel that lands after the last unit still wins over success.
        ctx.check_cancelled()?;
        staging.commit()
    }
}

// ---------------------------------------------------------------------------
// Stage threads
// ---------------------------------------------------------------------------

enum Msg<T> {
    Data(T),
    End,
}

struct StageRun {
    source: PathBuf,
    total_bytes: u64,
    chunk_size: usize,
    capacity: usize,
    progress_interval: Duration,
    progress: Arc<ProgressSender>,
    abort: CancellationToken,
}

impl StageRun {
    async fn execute(self, handles: StageHandles) -> Result<()> {
        let StageHandles {
            decoder,
            filters,
            encoder,
            muxer,
        } = handles;

        let (packet_tx, packet_rx) = mpsc::channel(self.capacity);
        let (frame_tx, frame_rx) = mpsc::channel(self.capacity);
        let (filtered_tx, filtered_rx) = mpsc::channel(self.capacity);
        let (encoded_tx, encoded_rx) = mpsc::channel(self.capacity);

        let abort = self.abort.clone();
        let source = self.source.clone();
        let demux = Demux {
            total_bytes: self.total_bytes,
            chunk_size: self.chunk_size,
            progress_interval: self.progress_interval,
            progress: Arc::clone(&self.progress),
        };

        let tasks: Vec<(StageKind, JoinHandle<Result<()>>)> = vec![
            (
                StageKind::Demux,
                spawn_stage(StageKind::Demux, &abort, move |abort| demux.run(&source, packet_tx, abort)),
            ),
            (
                StageKind::Decode,
                spawn_stage(StageKind::Decode, &abort, move |abort| {
                    decode(decoder, packet_rx, frame_tx, abort)
                }),
            ),
            (
                StageKind::Filter,
                spawn_stage(StageKind::Filter, &abort, move |abort| {
                    filter(filters, frame_rx, filtered_tx, abort)
                }),
            ),
            (
                StageKind::Encode,
                spawn_stage(StageKind::Encode, &abort, move |abort| {
                    encode(encoder, filtered_rx, encoded_tx, abort)
                }),
            ),
            (
                StageKind::Mux,
                spawn_stage(StageKind::Mux, &abort, move |abort| mux(muxer, encoded_rx, abort)),
            ),
        ];

        let mut first_error = None;
        let mut cancelled = false;
        for (kind, task) in tasks {
            let result = match task.await {
                Ok(r) => r,
                Err(e) => Err(Error::WorkerLost(format!("{kind} stage panicked: {e}"))),
            };
            match result {
                Ok(()) => {}
                Err(Error::Cancelled) => cancelled = true,
                Err(e) => {
                    tracing::debug!(stage = %kind, "stage failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if cancelled => Err(Error::Cancelled),
            None => Ok(()),
        }
    }
}

/// Run a stage on a blocking thread. Any error or panic cancels `abort`
/// so the other stages stop; errors are attributed to `kind`.
fn spawn_stage<F>(kind: StageKind, abort: &CancellationToken, f: F) -> JoinHandle<Result<()>>
where
    F: FnOnce(&CancellationToken) -> Result<()> + Send + 'static,
{
    let abort = abort.clone();
    tokio::task::spawn_blocking(move || {
        let guard = abort.clone().drop_guard();
        let result = f(&abort).map_err(|e| attribute(kind, e));
        if result.is_ok() {
            guard.disarm();
        }
        result
    })
}

fn attribute(kind: StageKind, e: Error) -> Error {
    match e {
        Error::Cancelled | Error::Stage { .. } | Error::WorkerLost(_) => e,
        other => Error::stage(kind.as_str(), other),
    }
}

fn send<T>(tx: &Sender<Msg<T>>, msg: Msg<T>) -> Result<()> {
    // A closed queue means the consumer already stopped.
    tx.blocking_send(msg).map_err(|_| Error::Cancelled)
}

/// `Ok(None)` at end of stream; `Err(Cancelled)` if the producer vanished.
fn recv<T>(rx: &mut Receiver<Msg<T>>) -> Result<Option<T>> {
    match rx.blocking_recv() {
        Some(Msg::Data(item)) => Ok(Some(item)),
        Some(Msg::End) => Ok(None),
        None => Err(Error::Cancelled),
    }
}

fn check(abort: &CancellationToken) -> Result<()> {
    if abort.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

struct Demux {
    total_bytes: u64,
    chunk_size: usize,
    progress_interval: Duration,
    progress: Arc<ProgressSender>,
}

impl Demux {
    fn run(self, source: &Path, tx: Sender<Msg<Packet>>, abort: &CancellationToken) -> Result<()> {
        let mut file = File::open(source)?;
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut consumed: u64 = 0;
        let mut seq = 0;

        loop {
            check(abort)?;
            let mut buf = vec![0u8; self.chunk_size];
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            buf.truncate(n);
            consumed += n as u64;

            send(&tx, Msg::Data(Packet { seq, data: Bytes::from(buf) }))?;
            seq += 1;

            if let Some(p) = throttle.offer(self.ratio(consumed)) {
                self.progress.send(p);
            }
        }

        if let Some(p) = throttle.finish(self.ratio(consumed)) {
            self.progress.send(p);
        }
        send(&tx, Msg::End)
    }

    fn ratio(&self, consumed: u64) -> f32 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        (consumed as f64 / self.total_bytes as f64).min(1.0) as f32
    }
}

fn decode(
    mut decoder: Box<dyn Decoder>,
    mut rx: Receiver<Msg<Packet>>,
    tx: Sender<Msg<Frame>>,
    abort: &CancellationToken,
) -> Result<()> {
    loop {
        check(abort)?;
        let frames = match recv(&mut rx)? {
            Some(packet) => decoder.decode(packet)?,
            None => break,
        };
        for frame in frames {
            send(&tx, Msg::Data(frame))?;
        }
    }
    for frame in decoder.flush()? {
        send(&tx, Msg::Data(frame))?;
    }
    send(&tx, Msg::End)
}

fn filter(
    mut filters: Vec<Box<dyn Filter>>,
    mut rx: Receiver<Msg<Frame>>,
    tx: Sender<Msg<Frame>>,
    abort: &CancellationToken,
) -> Result<()> {
    loop {
        check(abort)?;
        let frames = match recv(&mut rx)? {
            Some(frame) => apply_chain(&mut filters, vec![frame])?,
            None => break,
        };
        for frame in frames {
            send(&tx, Msg::Data(frame))?;
        }
    }
    for frame in flush_chain(&mut filters)? {
        send(&tx, Msg::Data(frame))?;
    }
    send(&tx, Msg::End)
}

fn apply_chain(filters: &mut [Box<dyn Filter>], mut frames: Vec<Frame>) -> Result<Vec<Frame>> {
    for f in filters.iter_mut() {
        let mut next = Vec::with_capacity(frames.len());
        for frame in frames {
            next.extend(f.apply(frame)?);
        }
        frames = next;
    }
    Ok(frames)
}

/// Flush each filter in turn, passing what it releases through the
/// filters after it before those are flushed.
fn flush_chain(filters: &mut [Box<dyn Filter>]) -> Result<Vec<Frame>> {
    let mut out = Vec::new();
    for i in 0..filters.len() {
        let (head, tail) = filters.split_at_mut(i + 1);
        let released = head[i].flush()?;
        out.extend(apply_chain(tail, released)?);
    }
    Ok(out)
}

fn encode(
    mut encoder: Box<dyn Encoder>,
    mut rx: Receiver<Msg<Frame>>,
    tx: Sender<Msg<Packet>>,
    abort: &CancellationToken,
) -> Result<()> {
    loop {
        check(abort)?;
        let packets = match recv(&mut rx)? {
            Some(frame) => encoder.encode(frame)?,
            None => break,
        };
        for packet in packets {
            send(&tx, Msg::Data(packet))?;
        }
    }
    for packet in encoder.flush()? {
        send(&tx, Msg::Data(packet))?;
    }
    send(&tx, Msg::End)
}

fn mux(mut muxer: Box<dyn Muxer>, mut rx: Receiver<Msg<Packet>>, abort: &CancellationToken) -> Result<()> {
    loop {
        check(abort)?;
        match recv(&mut rx)? {
            Some(packet) => muxer.write(packet)?,
            None => break,
        }
    }
    check(abort)?;
    muxer.finish()
}
