//! Pipeline planning.
//!
//! The [`Planner`] is a pure function of its inputs: the same descriptor,
//! target and options always produce the same [`PipelinePlan`]. Encoding
//! parameters not given in the job options come from a [`DefaultsTable`]
//! keyed by target format and resolution tier.

use std::collections::BTreeMap;

use vs_core::config::{DefaultOverride, PlannerConfig};
use vs_core::media::{Codec, Container, MediaKind, Resolution, ResolutionTier, TargetFormat};
use vs_core::plan::{DroppedStream, FilterSpec, PipelinePlan, StageSpec, StreamMapping};
use vs_core::{Error, JobOptions, Result};
use vs_probe::{MediaDescriptor, StreamDescriptor};

/// Tier assumed for sources without a measurable video stream.
const FALLBACK_TIER: ResolutionTier = ResolutionTier::Hd;

const OPUS_SAMPLE_RATE: u32 = 48_000;

// ---------------------------------------------------------------------------
// Container capabilities
// ---------------------------------------------------------------------------

/// Codecs a target container can carry. The first entry of each list is the
/// codec used when a source stream has to be re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub video: &'static [Codec],
    pub audio: &'static [Codec],
    pub subtitle: &'static [Codec],
    /// Whether bitmap subtitles can be carried.
    pub bitmap_subtitles: bool,
    /// Whether audio must be downmixed to stereo.
    pub stereo_only: bool,
}

impl Capabilities {
    fn codecs(&self, kind: MediaKind) -> &'static [Codec] {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::Audio => self.audio,
            MediaKind::Subtitle => self.subtitle,
        }
    }
}

pub fn capabilities(target: TargetFormat) -> Capabilities {
    use Codec::*;
    match target {
        Container::Mp4 => Capabilities {
            video: &[H264, H265, Av1, Mpeg4],
            audio: &[Aac, Mp3, Opus],
            subtitle: &[MovText],
            bitmap_subtitles: false,
            stereo_only: false,
        },
        Container::Mov => Capabilities {
            video: &[H264, H265, Prores],
            audio: &[Aac, Pcm],
            subtitle: &[MovText],
            bitmap_subtitles: false,
            stereo_only: false,
        },
        Container::Avi => Capabilities {
            video: &[Mpeg4, H264],
            audio: &[Mp3, Ac3, Pcm],
            subtitle: &[],
            bitmap_subtitles: false,
            stereo_only: true,
        },
        Container::Webm => Capabilities {
            video: &[Vp9, Vp8, Av1],
            audio: &[Opus, Vorbis],
            subtitle: &[Webvtt],
            bitmap_subtitles: false,
            stereo_only: false,
        },
        Container::Mkv => Capabilities {
            video: &[H264, H265, Vp9, Av1],
            audio: &[Aac, Opus, Flac, Ac3],
            subtitle: &[Srt, Ass, Pgs],
            bitmap_subtitles: true,
            stereo_only: false,
        },
    }
}

// ---------------------------------------------------------------------------
// Defaults table
// ---------------------------------------------------------------------------

/// Encoding defaults for one (target, tier) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Outputs taller than this are scaled down. `None` keeps the source.
    pub max_height: Option<u32>,
}

/// Built-in defaults with configured overrides layered on top.
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    overrides: BTreeMap<(Container, ResolutionTier), DefaultOverride>,
}

impl DefaultsTable {
    /// Later overrides for the same cell replace earlier ones.
    pub fn new(overrides: &[DefaultOverride]) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|o| ((o.target, o.tier), o.clone()))
                .collect(),
        }
    }

    pub fn lookup(&self, target: TargetFormat, tier: ResolutionTier) -> Defaults {
        let base = builtin(target, tier);
        match self.overrides.get(&(target, tier)) {
            Some(o) => Defaults {
                video_bitrate_kbps: o.video_bitrate_kbps.unwrap_or(base.video_bitrate_kbps),
                audio_bitrate_kbps: o.audio_bitrate_kbps.unwrap_or(base.audio_bitrate_kbps),
                max_height: o.max_height.or(base.max_height),
            },
            None => base,
        }
    }
}

fn builtin(target: TargetFormat, tier: ResolutionTier) -> Defaults {
    let video = match target {
        Container::Mp4 | Container::Mkv => [1200, 2500, 5000, 16000],
        Container::Mov => [1500, 3000, 6000, 20000],
        Container::Avi => [1000, 2000, 4000, 8000],
        Container::Webm => [1000, 2000, 4000, 12000],
    };
    let audio = match target {
        Container::Mp4 | Container::Mov | Container::Mkv => 192,
        Container::Avi => 160,
        Container::Webm => 128,
    };
    let max_height = match target {
        Container::Avi => Some(720),
        Container::Webm => Some(2160),
        _ => None,
    };
    let column = match tier {
        ResolutionTier::Sd => 0,
        ResolutionTier::Hd => 1,
        ResolutionTier::FullHd => 2,
        ResolutionTier::Uhd => 3,
    };
    Defaults {
        video_bitrate_kbps: video[column],
        audio_bitrate_kbps: audio,
        max_height,
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Planner {
    table: DefaultsTable,
}

impl Planner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            table: DefaultsTable::new(&config.overrides),
        }
    }

    pub fn defaults(&self) -> &DefaultsTable {
        &self.table
    }

    /// Build the plan converting `media` to `target`.
    ///
    /// Streams the target cannot carry are dropped with a warning. Fails
    /// with [`Error::IncompatibleFormat`] when no stream survives.
    pub fn plan(&self, media: &MediaDescriptor, target: TargetFormat, options: &JobOptions) -> Result<PipelinePlan> {
        let caps = capabilities(target);
        let tier = media
            .primary_video()
            .and_then(|v| v.resolution)
            .map(|r| r.tier());
        let defaults = self.table.lookup(target, tier.unwrap_or(FALLBACK_TIER));

        let mut mappings = Vec::new();
        let mut filters = Vec::new();
        let mut dropped = Vec::new();

        for stream in &media.streams {
            let Some(codec) = choose_codec(&caps, stream) else {
                let reason = drop_reason(target, stream);
                tracing::warn!(
                    stream = stream.index,
                    kind = %stream.kind,
                    codec = %stream.codec,
                    target = %target,
                    "dropping stream: {reason}"
                );
                dropped.push(DroppedStream {
                    input_index: stream.index,
                    kind: stream.kind,
                    codec: stream.codec,
                    reason,
                });
                continue;
            };

            let mut mapping = StreamMapping {
                input_index: stream.index,
                output_index: mappings.len(),
                kind: stream.kind,
                source_codec: stream.codec,
                codec,
                copy: false,
                bitrate_kbps: None,
                resolution: None,
                sample_rate: None,
                channels: None,
            };
            let filtered_before = filters.len();

            let overridden = match stream.kind {
                MediaKind::Video => {
                    self.plan_video(stream, target, &defaults, options, &mut mapping, &mut filters);
                    options.video_bitrate_kbps.is_some()
                }
                MediaKind::Audio => {
                    plan_audio(stream, &caps, &defaults, options, &mut mapping, &mut filters);
                    options.audio_bitrate_kbps.is_some()
                }
                MediaKind::Subtitle => false,
            };

            mapping.copy = codec == stream.codec && filters.len() == filtered_before && !overridden;
            if mapping.copy {
                mapping.bitrate_kbps = None;
            }
            mappings.push(mapping);
        }

        if mappings.is_empty() {
            return Err(Error::IncompatibleFormat(format!(
                "{} cannot carry any of the {} source stream(s) of {}",
                target,
                media.streams.len(),
                media.source.display()
            )));
        }

        let mut stages = Vec::with_capacity(4 + filters.len());
        stages.push(StageSpec::Demux {
            container: media.container,
        });
        stages.push(StageSpec::Decode {
            streams: mappings.iter().map(|m| m.input_index).collect(),
        });
        stages.extend(filters.into_iter().map(StageSpec::Filter));
        stages.push(StageSpec::Encode { streams: mappings });
        stages.push(StageSpec::Mux { container: target });

        let plan = PipelinePlan {
            target,
            tier,
            stages,
            dropped,
        };
        tracing::debug!(
            target = %target,
            streams = plan.streams().len(),
            filters = plan.filters().count(),
            dropped = plan.dropped.len(),
            copy_only = plan.is_copy_only(),
            "plan built"
        );
        Ok(plan)
    }

    fn plan_video(
        &self,
        stream: &StreamDescriptor,
        target: TargetFormat,
        defaults: &Defaults,
        options: &JobOptions,
        mapping: &mut StreamMapping,
        filters: &mut Vec<FilterSpec>,
    ) {
        let output = match (options.resolution, stream.resolution) {
            (Some(requested), _) => Some(requested),
            (None, Some(source)) => Some(fit(source, defaults.max_height)),
            (None, None) => None,
        };

        if let (Some(source), Some(out)) = (stream.resolution, output) {
            if source != out {
                filters.push(FilterSpec::Scale {
                    stream: stream.index,
                    from: source,
                    to: out,
                });
            }
        }

        // Bitrate follows the tier actually produced.
        let out_tier = output.map(|r| r.tier()).unwrap_or(FALLBACK_TIER);
        let table_rate = self.table.lookup(target, out_tier).video_bitrate_kbps;

        mapping.resolution = output;
        mapping.bitrate_kbps = Some(options.video_bitrate_kbps.unwrap_or(table_rate));
    }
}

fn plan_audio(
    stream: &StreamDescriptor,
    caps: &Capabilities,
    defaults: &Defaults,
    options: &JobOptions,
    mapping: &mut StreamMapping,
    filters: &mut Vec<FilterSpec>,
) {
    let sample_rate = if mapping.codec == Codec::Opus {
        Some(OPUS_SAMPLE_RATE)
    } else {
        stream.sample_rate
    };
    if let (Some(from), Some(to)) = (stream.sample_rate, sample_rate) {
        if from != to {
            filters.push(FilterSpec::Resample {
                stream: stream.index,
                from,
                to,
            });
        }
    }

    let channels = match stream.channels {
        Some(ch) if caps.stereo_only && ch > 2 => {
            filters.push(FilterSpec::Downmix {
                stream: stream.index,
                from: ch,
                to: 2,
            });
            Some(2)
        }
        other => other,
    };

    mapping.sample_rate = sample_rate;
    mapping.channels = channels;
    mapping.bitrate_kbps = Some(options.audio_bitrate_kbps.unwrap_or(defaults.audio_bitrate_kbps));
}

/// The codec a source stream is written with, or `None` if it is dropped.
fn choose_codec(caps: &Capabilities, stream: &StreamDescriptor) -> Option<Codec> {
    let allowed = caps.codecs(stream.kind);
    if allowed.contains(&stream.codec) {
        return Some(stream.codec);
    }
    if stream.kind == MediaKind::Subtitle && stream.codec.is_bitmap_subtitle() && !caps.bitmap_subtitles {
        return None;
    }
    // Bitmap targets (pgs) cannot be produced from text.
    allowed.iter().copied().find(|c| !c.is_bitmap_subtitle())
}

fn drop_reason(target: TargetFormat, stream: &StreamDescriptor) -> String {
    if stream.kind == MediaKind::Subtitle && stream.codec.is_bitmap_subtitle() {
        format!("{target} cannot carry bitmap subtitles")
    } else {
        format!("{target} cannot carry {} streams", stream.kind)
    }
}

/// Output resolution for a source frame size under `max_height`.
pub fn fit(resolution: Resolution, max_height: Option<u32>) -> Resolution {
    max_height.map_or(resolution, |max| resolution.fit_height(max))
}
