mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, Overrides};
use tokio_util::sync::CancellationToken;
use vs_core::config::Config;
use vs_core::{Container, JobOptions, JobState, MediaKind, Resolution};
use vs_probe::{CompositeProber, Prober, RustProber};
use vs_server::AppContext;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidshift=debug,vs_core=debug,vs_probe=debug,vs_av=debug,vs_pipeline=debug,vs_db=debug,vs_scheduler=debug,vs_server=debug,tower_http=debug".to_string()
        } else {
            "vidshift=info,vs_core=info,vs_probe=info,vs_av=info,vs_pipeline=info,vs_db=info,vs_scheduler=info,vs_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(vs_server::start(config))?;
            Ok(())
        }
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Plan {
            file,
            target,
            overrides,
        } => plan_file(&file, &target, &overrides, cli.config.as_deref()),
        Commands::Convert {
            file,
            target,
            output_dir,
            overrides,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(file, &target, output_dir, &overrides, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate { config: config_path } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidshift {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn prober() -> CompositeProber {
    CompositeProber::new(vec![Box::new(RustProber::new())])
}

fn job_options(overrides: &Overrides) -> Result<JobOptions> {
    let resolution = overrides
        .resolution
        .as_deref()
        .map(str::parse::<Resolution>)
        .transpose()
        .context("invalid --resolution")?;
    Ok(JobOptions {
        video_bitrate_kbps: overrides.video_bitrate,
        audio_bitrate_kbps: overrides.audio_bitrate,
        resolution,
    })
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let media = prober().probe(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&media)?);
        return Ok(());
    }

    println!("File: {}", media.source.display());
    println!("Container: {}", media.container);
    println!("Size: {} bytes", media.file_size);
    if let Some(duration) = media.duration {
        let secs = duration.as_secs();
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }
    if let Some(kbps) = media.bitrate_kbps {
        println!("Bitrate: {kbps} kbps");
    }

    for kind in [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle] {
        let streams: Vec<_> = media.streams_of(kind).collect();
        println!("\n{kind} streams: {}", streams.len());
        for s in streams {
            print!("  [{}] {}", s.index, s.codec);
            if let Some(res) = s.resolution {
                print!(" {res}");
            }
            if let Some(fps) = s.frame_rate {
                print!(" {fps:.3} fps");
            }
            if let (Some(rate), Some(ch)) = (s.sample_rate, s.channels) {
                print!(" {rate} Hz {ch}ch");
            }
            if let Some(ref lang) = s.language {
                print!(" ({lang})");
            }
            println!();
        }
    }

    Ok(())
}

fn plan_file(file: &Path, target: &str, overrides: &Overrides, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let target: Container = target.parse()?;
    let options = job_options(overrides)?;

    let media = prober().probe(file)?;
    let plan = vs_pipeline::Planner::new(&config.planner).plan(&media, target, &options)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn convert_file(
    file: std::path::PathBuf,
    target: &str,
    output_dir: Option<std::path::PathBuf>,
    overrides: &Overrides,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(dir) = output_dir {
        config.engine.output_dir = dir;
    }
    let target: Container = target.parse()?;
    let options = job_options(overrides)?;

    let ctx = AppContext::build(config)?;
    let scheduler = ctx.scheduler.clone();
    let shutdown = CancellationToken::new();
    let dispatch = scheduler.start(shutdown.clone());

    let job = scheduler.submit(file, target, options)?;
    tracing::info!(job_id = %job.id, "converting {} to {target}", job.source.display());

    // Ctrl+C cancels the job instead of killing the process.
    let cancel_scheduler = scheduler.clone();
    let id = job.id;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            if let Err(e) = cancel_scheduler.cancel(id) {
                tracing::warn!(job_id = %id, "cancel failed: {e}");
            }
        }
    });

    let mut rx = scheduler.subscribe(job.id)?;
    let mut last_pct = None;
    let done = loop {
        let current = rx.borrow_and_update().clone();
        if current.state == JobState::Running {
            let pct = (current.progress * 100.0).floor() as u32;
            if last_pct != Some(pct) {
                eprint!("\r{pct:3}%");
                last_pct = Some(pct);
            }
        }
        if current.is_terminal() {
            break current;
        }
        if rx.changed().await.is_err() {
            break scheduler.get(job.id)?;
        }
    };
    eprintln!();

    shutdown.cancel();
    let _ = dispatch.await;

    match done.state {
        JobState::Succeeded => {
            let output = done.output.unwrap_or_default();
            println!("Output: {}", output.display());
            Ok(())
        }
        JobState::Cancelled => anyhow::bail!("job {} was cancelled", done.id),
        _ => match done.error {
            Some(failure) => anyhow::bail!("job {} failed: {failure}", done.id),
            None => anyhow::bail!("job {} failed", done.id),
        },
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    println!("Checking external tools...\n");

    let registry = vs_av::ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{status} {}", tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All tools are available.");
    } else {
        println!("Some tools are missing; the ffmpeg backend cannot be used.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    config.check()?;
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for w in &warnings {
            println!("! {w}");
        }
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Concurrency: {}", config.engine.concurrency_cap());
    println!("  Backend: {:?}", config.engine.backend);
    println!("  Output dir: {}", config.engine.output_dir.display());
    match &config.store.db_path {
        Some(p) => println!("  Job store: sqlite ({})", p.display()),
        None => println!("  Job store: memory"),
    }
    println!("  Planner overrides: {}", config.planner.overrides.len());

    Ok(())
}
