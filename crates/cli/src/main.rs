//! CLI entry point for media-vault
//!
//! Parses command line arguments, loads configuration and runs a backup or
//! restore.

use clap::{Parser, Subcommand};
use media_vault::{run_preflight_checks, Config, Engine, FfmpegTranscoder, ProgressTracker};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// media-vault - Back up a media library onto size-limited storage
#[derive(Parser, Debug)]
#[command(name = "media-vault")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip preflight checks (ffmpeg, ffprobe availability)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Do not render the progress line
    #[arg(long, default_value = "false")]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Copy the library to the backup root, splitting oversized videos
    Backup,
    /// Copy the backup back into the library, joining split videos
    Restore,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        config = %args.config.display(),
        library_root = %config.paths.library_root.display(),
        backup_root = %config.paths.backup_root.display(),
        "configuration loaded"
    );

    if args.skip_checks {
        warn!("skipping preflight checks (--skip-checks enabled)");
    } else if let Err(e) = run_preflight_checks(&config.transcode) {
        error!(error = %e, "preflight check failed");
        return ExitCode::FAILURE;
    }

    let progress = if args.no_progress || !std::io::stdout().is_terminal() {
        ProgressTracker::disabled()
    } else {
        ProgressTracker::stdout()
    };
    let transcoder = Arc::new(FfmpegTranscoder::new(config.transcode.clone()));
    let mut engine = Engine::new(config, transcoder).with_progress(progress);

    let result = match args.command {
        Command::Backup => engine.backup().await,
        Command::Restore => engine.restore().await,
    };

    match result {
        Ok(summary) if summary.failed > 0 => {
            warn!(failed = summary.failed, "run finished with failures");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}
