//! Health, format capability and tool route handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use vs_av::ToolInfo;
use vs_core::{Codec, Container};

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub running: usize,
    pub queued: usize,
    pub capacity: usize,
}

/// GET /api/health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        running: ctx.scheduler.running_count(),
        queued: ctx.scheduler.queued_count(),
        capacity: ctx.scheduler.capacity(),
    })
}

/// A target format and the codecs it can carry. The first codec of each
/// kind is the one used when a stream has to be re-encoded.
#[derive(Debug, Serialize)]
pub struct FormatInfo {
    pub name: Container,
    pub extension: &'static str,
    pub video: Vec<Codec>,
    pub audio: Vec<Codec>,
    pub subtitle: Vec<Codec>,
    pub bitmap_subtitles: bool,
}

/// GET /api/formats
pub async fn formats() -> Json<Vec<FormatInfo>> {
    let formats = Container::ALL
        .iter()
        .map(|&target| {
            let caps = vs_pipeline::capabilities(target);
            FormatInfo {
                name: target,
                extension: target.extension(),
                video: caps.video.to_vec(),
                audio: caps.audio.to_vec(),
                subtitle: caps.subtitle.to_vec(),
                bitmap_subtitles: caps.bitmap_subtitles,
            }
        })
        .collect();
    Json(formats)
}

/// GET /api/tools
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<ToolInfo>> {
    Json(ctx.tools.check_all())
}
