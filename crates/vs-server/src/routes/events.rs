//! Server-Sent Events (SSE) handler.
//!
//! Subscribes to the [`vs_core::events::EventBus`], optionally filtered to a
//! single job, replays recent events for late joiners and sends heartbeats.
//! A subscriber that falls behind the broadcast channel receives a snapshot
//! of the affected jobs instead of the events it missed.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use vs_core::{Error, JobFilter, JobId};

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events for this job.
    pub job_id: Option<String>,
}

/// GET /api/events
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let job_filter = params
        .job_id
        .as_deref()
        .map(|id| {
            id.parse::<JobId>()
                .map_err(|_| Error::Validation(format!("invalid job id: {id}")))
        })
        .transpose()?;

    let mut rx = ctx.event_bus.subscribe();
    let recent = ctx.event_bus.recent_events(50);

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if matches_job(event.payload.job_id(), job_filter) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(Event::default().event("job").data(data));
                }
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches_job(event.payload.job_id(), job_filter) {
                        if let Ok(data) = serde_json::to_string(&event) {
                            yield Ok(Event::default().event("job").data(data));
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events; sending snapshot");
                    let jobs = match job_filter {
                        Some(id) => ctx.scheduler.get(id).map(|job| vec![job]),
                        None => ctx.scheduler.list(&JobFilter::default()),
                    };
                    match jobs {
                        Ok(jobs) => {
                            for job in jobs {
                                if let Ok(data) = serde_json::to_string(&job) {
                                    yield Ok(Event::default().event("snapshot").data(data));
                                }
                            }
                        }
                        Err(e) => tracing::warn!("snapshot for lagged SSE client failed: {e}"),
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")))
}

fn matches_job(event_job: JobId, filter: Option<JobId>) -> bool {
    filter.map_or(true, |id| id == event_job)
}
