//! # mojo CLI
//!
//! Drives the in-process core and the bindings end to end.
//!
//! ## Commands
//!
//! - `mojo echo` - Echo service behind a stub, verified by a client
//! - `mojo data-pipe` - Stream bytes through a data pipe and compare hashes
//! - `mojo info` - Print the effective core configuration

mod data_pipe;
mod echo;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mojo_system::{Core, EmbedderConfig, Handle};

/// Mojo IPC - message pipes, data pipes and shared buffers
#[derive(Parser)]
#[command(name = "mojo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON file with core limits
    #[arg(long, env = "MOJO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve echo requests from worker threads and verify every reply
    Echo {
        /// Number of requests to send
        #[arg(long, default_value_t = 1000)]
        requests: u64,

        /// Threads serving the stub
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Size of each request payload
        #[arg(long, default_value_t = 256)]
        payload_bytes: usize,
    },

    /// Stream bytes through a data pipe with two-phase writes
    DataPipe {
        /// Total bytes to transfer
        #[arg(long, default_value_t = 16 * 1024 * 1024)]
        bytes: u64,

        /// Pipe capacity in bytes
        #[arg(long, default_value_t = 64 * 1024)]
        capacity: u32,
    },

    /// Print the effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let core = Core::with_config(config.clone());

    match cli.command {
        Commands::Echo {
            requests,
            workers,
            payload_bytes,
        } => run_blocking(move || echo::run(core, requests, workers, payload_bytes)).await,
        Commands::DataPipe { bytes, capacity } => {
            run_blocking(move || data_pipe::run(core, bytes, capacity)).await
        }
        Commands::Info => cmd_info(&core, &config),
    }
}

fn load_config(path: Option<&Path>) -> Result<EmbedderConfig> {
    let Some(path) = path else {
        return Ok(EmbedderConfig::default());
    };
    let config = EmbedderConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Run blocking pipe work off the runtime, racing it against ctrl-c.
async fn run_blocking<F>(work: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        joined = task => joined.context("Worker thread panicked")?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted");
            // Threads blocked in the core cannot be unwound from here.
            std::process::exit(130);
        }
    }
}

fn cmd_info(core: &Core, config: &EmbedderConfig) -> Result<()> {
    let (h0, _h1) = core
        .create_message_pipe(None)
        .context("Failed to create probe pipe")?;

    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("  Clock:        {} us", core.get_time_ticks_now());
    println!("  Probe handle: {}", h0.native_handle());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_defaults_without_path() {
        assert_eq!(load_config(None).unwrap(), EmbedderConfig::default());
    }

    #[test]
    fn test_load_config_rejects_invalid_limits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mojo.json");
        fs::write(&path, r#"{ "default_data_pipe_capacity": 0 }"#).unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("default_data_pipe_capacity"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["mojo", "data-pipe", "--bytes", "10", "--capacity", "4"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::DataPipe {
                bytes: 10,
                capacity: 4
            }
        ));
    }
}
