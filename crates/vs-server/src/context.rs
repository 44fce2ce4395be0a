//! Application context shared by every route handler.
//!
//! [`AppContext`] wires the engine together from a [`Config`]: job store,
//! prober, planner, codec backend, worker and scheduler. It is cheap to clone
//! and handed to axum as router state.

use std::sync::Arc;

use vs_av::ToolRegistry;
use vs_core::config::Config;
use vs_core::events::EventBus;
use vs_core::Result;
use vs_pipeline::{Planner, TranscodeWorker};
use vs_probe::{CompositeProber, Prober, RustProber};
use vs_scheduler::Scheduler;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub scheduler: Scheduler,
    pub event_bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
}

impl AppContext {
    /// Build the engine described by `config`.
    ///
    /// Fails on an unusable config, when the job store cannot be opened, or
    /// when the configured backend needs a tool that is not installed.
    pub fn build(config: Config) -> Result<Self> {
        config.check()?;
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        for info in tools.check_all() {
            if info.available {
                tracing::info!(
                    "Tool found: {} ({})",
                    info.name,
                    info.version.as_deref().unwrap_or("unknown version")
                );
            } else {
                tracing::debug!("Tool not found: {}", info.name);
            }
        }

        let store = vs_db::open_store(&config.store)?;
        let prober: Arc<dyn Prober> = Arc::new(CompositeProber::new(vec![Box::new(RustProber::new())]));
        let planner = Arc::new(Planner::new(&config.planner));
        let backend = vs_av::backend_for(config.engine.backend, &config.tools)?;
        tracing::info!(backend = backend.name(), "codec backend ready");

        let worker = Arc::new(TranscodeWorker::new(prober, planner, backend, config.engine.clone()));
        let event_bus = Arc::new(EventBus::default());
        let scheduler = Scheduler::new(store, worker, Arc::clone(&event_bus));

        Ok(Self {
            config: Arc::new(config),
            scheduler,
            event_bus,
            tools,
        })
    }

    /// Context around an already assembled scheduler.
    pub fn from_scheduler(config: Config, scheduler: Scheduler) -> Self {
        let event_bus = Arc::clone(scheduler.events());
        Self {
            tools: Arc::new(ToolRegistry::discover(&config.tools)),
            config: Arc::new(config),
            scheduler,
            event_bus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vs_core::config::BackendKind;
    use vs_core::Error;

    #[test]
    fn zero_concurrency_is_refused() {
        let mut config = Config::default();
        config.engine.backend = BackendKind::Passthrough;
        config.engine.concurrency = Some(0);
        assert!(matches!(AppContext::build(config), Err(Error::Validation(_))));
    }
}
