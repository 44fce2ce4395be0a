//! Execution context for one worker run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vs_core::{Error, Result};

/// Receives the fraction of source bytes consumed (0.0 to 1.0).
pub struct ProgressSender {
    callback: Box<dyn Fn(f32) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    pub fn send(&self, progress: f32) {
        (self.callback)(progress);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Passed to [`crate::TranscodeWorker::execute`].
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Checked between stage units; the worker stops cooperatively once
    /// it fires.
    pub cancellation: CancellationToken,
    pub progress: Arc<ProgressSender>,
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerContext {
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            progress: Arc::new(ProgressSender::noop()),
        }
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn progress_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = WorkerContext::new().with_progress(ProgressSender::new(move |p| sink.lock().push(p)));
        ctx.progress.send(0.25);
        ctx.progress.send(0.5);
        assert_eq!(*seen.lock(), vec![0.25, 0.5]);
    }

    #[test]
    fn cancelled_token_is_reported() {
        let token = CancellationToken::new();
        let ctx = WorkerContext::new().with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(Error::Cancelled)));
    }
}
