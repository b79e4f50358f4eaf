//! Log Listener Proxy
//!
//! Relays job log streams from one writer to any number of live readers.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::orchestrator::{OrchestratorEvent, ProxyOrchestrator};
use tracing_subscriber::EnvFilter;

/// Log Listener Proxy - relays job log streams to live WebSocket readers.
#[derive(Parser, Debug)]
#[command(name = "log-listener-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the proxy
    Start(StartArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Overrides applied on top of the configuration file and environment.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (ignored when the port manager is enabled)
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Session time-to-live in seconds
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Seconds a drained channel keeps its readers
    #[arg(long)]
    pub linger: Option<u64>,

    /// Lease the listen port from the port manager
    #[arg(long)]
    pub use_port_manager: bool,

    /// Port manager base URL
    #[arg(long, value_name = "URL")]
    pub port_manager_url: Option<String>,
}

impl StartArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ttl) = self.ttl {
            config.session.ttl_secs = ttl;
        }
        if let Some(linger) = self.linger {
            config.session.linger_secs = linger;
        }
        if self.use_port_manager {
            config.port_manager.enabled = true;
        }
        if let Some(url) = &self.port_manager_url {
            config.port_manager.url = url.clone();
        }
    }
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let command = cli
        .command
        .clone()
        .unwrap_or_else(|| Commands::Start(StartArgs::default()));
    if let Commands::Start(args) = &command {
        args.apply(&mut config);
    }

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;

    match command {
        Commands::Start(_) => {
            tracing::info!("Log listener proxy starting...");
            let mut orchestrator = ProxyOrchestrator::new(config)?;
            run_headless(&mut orchestrator).await?;
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default()
                .save(&config_path)
                .with_context(|| format!("Failed to initialize {}", config_path.display()))?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

/// Run the proxy until a shutdown signal arrives.
async fn run_headless(orchestrator: &mut ProxyOrchestrator) -> anyhow::Result<()> {
    let mut events = orchestrator.subscribe();

    // Spawn event logging task
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::debug!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::Listening { addr } => {
                    tracing::debug!("Listening on {}", addr);
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    orchestrator.start().await?;

    // Wait for shutdown signal (SIGTERM or SIGINT)
    wait_for_shutdown_signal().await?;
    tracing::info!("Received shutdown signal");

    orchestrator.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
