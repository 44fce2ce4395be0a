use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidshift")]
#[command(author, version, about = "Batch video transcoding job engine")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the job engine and its HTTP API
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a media file and display its streams
    Probe {
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the conversion plan for a file without running it
    Plan {
        #[arg(required = true)]
        file: PathBuf,

        /// Target format: mp4, avi, mov, webm or mkv
        #[arg(short, long, default_value = "mp4")]
        target: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Convert a single file and wait for the result
    Convert {
        #[arg(required = true)]
        file: PathBuf,

        /// Target format: mp4, avi, mov, webm or mkv
        #[arg(short, long, default_value = "mp4")]
        target: String,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Check that external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Per-job overrides of the planner defaults.
#[derive(clap::Args)]
pub struct Overrides {
    /// Video bitrate in kbps
    #[arg(long)]
    pub video_bitrate: Option<u32>,

    /// Audio bitrate in kbps
    #[arg(long)]
    pub audio_bitrate: Option<u32>,

    /// Output resolution, e.g. 1280x720
    #[arg(long)]
    pub resolution: Option<String>,
}
