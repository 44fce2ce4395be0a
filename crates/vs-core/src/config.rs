//! Engine configuration types.
//!
//! The top-level [`Config`] is deserialized from JSON. Every section has
//! defaults, so an empty `{}` file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::{Container, ResolutionTier};
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub planner: PlannerConfig,
    pub store: StoreConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, missing or unparsable.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.engine.concurrency == Some(0) {
            return Err(Error::Validation(
                "engine.concurrency must be at least 1 (omit it to use the CPU count)".into(),
            ));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        let engine = &self.engine;
        if engine.buffer_capacity == 0 {
            warnings.push("engine.buffer_capacity is 0; using 1".into());
        }
        if engine.chunk_size == 0 {
            warnings.push("engine.chunk_size is 0; using the default".into());
        }
        if !(engine.timeout_factor.is_finite() && engine.timeout_factor > 0.0) {
            warnings.push(format!(
                "engine.timeout_factor {} is not a positive number; using {}",
                engine.timeout_factor,
                default_timeout_factor()
            ));
        }
        if engine.estimate_bytes_per_sec == 0 {
            warnings.push("engine.estimate_bytes_per_sec is 0; timeouts fall back to min_timeout_ms".into());
        }

        for (i, o) in self.planner.overrides.iter().enumerate() {
            if o.video_bitrate_kbps == Some(0) || o.audio_bitrate_kbps == Some(0) {
                warnings.push(format!("planner.overrides[{i}] sets a zero bitrate"));
            }
            if o.max_height == Some(0) {
                warnings.push(format!("planner.overrides[{i}].max_height is 0"));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Which codec backend workers drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pipes the payload through the ffmpeg CLI.
    #[default]
    Ffmpeg,
    /// Copies the source unchanged. Only accepts plans that keep the
    /// container and copy every stream.
    Passthrough,
}

/// Scheduling and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of concurrently running jobs. Defaults to the number
    /// of logical CPUs.
    pub concurrency: Option<usize>,
    /// Items each inter-stage queue may hold before the producer suspends.
    pub buffer_capacity: usize,
    /// Bytes read from the source per demux iteration.
    pub chunk_size: usize,
    /// Minimum wall time between progress writes to the job store.
    pub progress_interval_ms: u64,
    pub output_dir: PathBuf,
    pub backend: BackendKind,
    /// Hard timeout as a multiple of the estimated duration.
    pub timeout_factor: f64,
    /// Throughput assumed when estimating duration from source size.
    pub estimate_bytes_per_sec: u64,
    pub min_timeout_ms: u64,
    /// Fixed hard timeout, overriding the estimate when set.
    pub job_timeout_ms: Option<u64>,
    /// How long a timed-out job gets to honor cancellation before it is
    /// forced to `Failed`.
    pub cancel_grace_ms: u64,
}

fn default_timeout_factor() -> f64 {
    2.0
}

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            buffer_capacity: 8,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval_ms: 200,
            output_dir: PathBuf::from("./output"),
            backend: BackendKind::default(),
            timeout_factor: default_timeout_factor(),
            estimate_bytes_per_sec: 4 * 1024 * 1024,
            min_timeout_ms: 30_000,
            job_timeout_ms: None,
            cancel_grace_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// The effective concurrency cap, always at least 1.
    pub fn concurrency_cap(&self) -> usize {
        self.concurrency.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity.max(1)
    }

    pub fn chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Hard timeout for a job whose source is `source_size` bytes.
    ///
    /// `timeout_factor` times the estimated duration, never less than
    /// `min_timeout_ms`. An explicit `job_timeout_ms` wins.
    pub fn job_timeout(&self, source_size: u64) -> Duration {
        if let Some(ms) = self.job_timeout_ms {
            return Duration::from_millis(ms);
        }
        let floor = Duration::from_millis(self.min_timeout_ms);
        if self.estimate_bytes_per_sec == 0 {
            return floor;
        }
        let factor = if self.timeout_factor.is_finite() && self.timeout_factor > 0.0 {
            self.timeout_factor
        } else {
            default_timeout_factor()
        };
        let estimate = source_size as f64 / self.estimate_bytes_per_sec as f64;
        Duration::from_secs_f64(estimate * factor).max(floor)
    }
}

/// One entry overriding the planner's built-in defaults table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultOverride {
    pub target: Container,
    pub tier: ResolutionTier,
    #[serde(default)]
    pub video_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub max_height: Option<u32>,
}

/// Planner defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub overrides: Vec<DefaultOverride>,
}

/// Job store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. When unset jobs live in memory only.
    pub db_path: Option<PathBuf>,
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
