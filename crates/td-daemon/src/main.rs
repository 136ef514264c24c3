//! touch-detector daemon
//!
//! Reports when a hardware security token is waiting for a touch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use td_core::config::{self, DetectorConfig};
use td_daemon::Daemon;
use td_protocol::WireFormat;

#[derive(Parser)]
#[command(name = "touch-detector")]
#[command(about = "Detects when a security token is waiting for a touch")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output (debug log level)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// pam-u2f lock file (overrides config)
    #[arg(long)]
    u2f_lock_path: Option<PathBuf>,

    /// gpg keybox file (overrides config)
    #[arg(long)]
    gpg_pubring_path: Option<PathBuf>,

    /// Broadcast socket path (overrides config)
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Broadcast line format: text or json (overrides config)
    #[arg(long)]
    socket_format: Option<WireFormat>,

    /// Disable the U2F detector
    #[arg(long)]
    no_u2f: bool,

    /// Disable the GPG detector
    #[arg(long)]
    no_gpg: bool,

    /// Disable the SSH agent proxy
    #[arg(long)]
    no_ssh: bool,

    /// Disable the broadcast socket
    #[arg(long)]
    no_socket: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(path) = &self.u2f_lock_path {
            config.u2f.lock_path = path.clone();
        }
        if let Some(path) = &self.gpg_pubring_path {
            config.gpg.pubring_path = path.clone();
        }
        if let Some(path) = &self.socket_path {
            config.socket.path = path.clone();
        }
        if let Some(format) = self.socket_format {
            config.socket.format = format;
        }
        if self.no_u2f {
            config.u2f.enabled = false;
        }
        if self.no_gpg {
            config.gpg.enabled = false;
        }
        if self.no_ssh {
            config.ssh.enabled = false;
        }
        if self.no_socket {
            config.socket.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config: DetectorConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                DetectorConfig::default()
            })
        } else {
            tracing::debug!("Using default configuration");
            DetectorConfig::default()
        }
    };

    args.apply(&mut config);
    config.expand_paths();
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    tracing::info!("touch-detector starting...");
    let daemon = Daemon::start(&config)
        .await
        .context("Failed to start touch detector")?;

    let report = daemon
        .run_until_signal()
        .await
        .context("Failed to listen for termination signals")?;

    if report.abandoned > 0 {
        tracing::warn!("{} watchers exited without acknowledging", report.abandoned);
    }
    tracing::info!("touch-detector shutdown complete");
    Ok(())
}
