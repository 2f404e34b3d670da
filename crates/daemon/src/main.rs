//! ScreenBridge Daemon
//!
//! Serves GNU screen sessions to browser terminals over WebSocket.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::orchestrator::{BridgeOrchestrator, OrchestratorEvent};
use daemon::protocol::ScreenSession;
use daemon::session::SessionDirectory;
use tracing_subscriber::EnvFilter;

/// ScreenBridge - attach browser terminals to GNU screen sessions.
#[derive(Parser, Debug)]
#[command(name = "screenbridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bridge until SIGINT or SIGTERM
    Start {
        /// HTTP listen address (overrides config)
        #[arg(long, value_name = "ADDR")]
        http_addr: Option<String>,

        /// WebSocket listen address (overrides config)
        #[arg(long, value_name = "ADDR")]
        ws_addr: Option<String>,
    },

    /// Manage screen sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for screen session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List screen sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Create a detached screen session
    Create {
        /// Session name
        name: String,
    },
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.daemon.log_level.to_lowercase()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Start { http_addr, ws_addr } => {
            if let Some(addr) = http_addr {
                config.server.http_addr = addr;
            }
            if let Some(addr) = ws_addr {
                config.server.ws_addr = addr;
            }
            config.validate()?;

            let mut orchestrator = BridgeOrchestrator::new(config)?;
            run_headless(&mut orchestrator).await?;
        }
        Commands::Sessions(SessionsCommands::List { json }) => {
            let directory = SessionDirectory::new(config.session.screen_binary.clone());
            let sessions = directory.list().await?.into_sessions();
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print_sessions_table(&sessions);
            }
        }
        Commands::Sessions(SessionsCommands::Create { name }) => {
            let directory = SessionDirectory::new(config.session.screen_binary.clone());
            directory.create(&name).await?;
            println!("Session '{}' created", name);
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

/// Print sessions in a formatted ASCII table.
fn print_sessions_table(sessions: &[ScreenSession]) {
    if sessions.is_empty() {
        println!("No screen sessions.");
        return;
    }

    let name_width = sessions
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let pid_width = sessions
        .iter()
        .map(|s| s.pid.len())
        .max()
        .unwrap_or(3)
        .max(3);

    println!(
        "{:<name_width$}  {:>pid_width$}  STATUS",
        "NAME",
        "PID",
        name_width = name_width,
        pid_width = pid_width
    );
    println!("{}", "-".repeat(name_width + pid_width + 10));

    for session in sessions {
        println!(
            "{:<name_width$}  {:>pid_width$}  {}",
            session.name,
            session.pid,
            session.status,
            name_width = name_width,
            pid_width = pid_width
        );
    }

    println!();
    println!("Total: {} session(s)", sessions.len());
}

/// Run the bridge until a shutdown signal arrives.
async fn run_headless(orchestrator: &mut BridgeOrchestrator) -> anyhow::Result<()> {
    // Subscribe before starting so no state change is missed
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::Listening { http, ws } => {
                    tracing::info!("HTTP on http://{} , bridge on ws://{}", http, ws);
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["screenbridge", "start"]).unwrap();
        match cli.command {
            Commands::Start { http_addr, ws_addr } => {
                assert!(http_addr.is_none());
                assert!(ws_addr.is_none());
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_addresses() {
        let cli = Cli::try_parse_from([
            "screenbridge",
            "start",
            "--http-addr",
            "127.0.0.1:8080",
            "--ws-addr",
            "127.0.0.1:8081",
        ])
        .unwrap();
        match cli.command {
            Commands::Start { http_addr, ws_addr } => {
                assert_eq!(http_addr.as_deref(), Some("127.0.0.1:8080"));
                assert_eq!(ws_addr.as_deref(), Some("127.0.0.1:8081"));
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_sessions_list() {
        let cli = Cli::try_parse_from(["screenbridge", "sessions", "list"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(!json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_list_json() {
        let cli = Cli::try_parse_from(["screenbridge", "sessions", "list", "--json"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::List { json }) => assert!(json),
            _ => panic!("Expected Sessions List command"),
        }
    }

    #[test]
    fn test_sessions_create() {
        let cli = Cli::try_parse_from(["screenbridge", "sessions", "create", "work"]).unwrap();
        match cli.command {
            Commands::Sessions(SessionsCommands::Create { name }) => assert_eq!(name, "work"),
            _ => panic!("Expected Sessions Create command"),
        }
    }

    #[test]
    fn test_sessions_create_requires_name() {
        let result = Cli::try_parse_from(["screenbridge", "sessions", "create"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::try_parse_from(["screenbridge", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));
    }

    #[test]
    fn test_config_init_force() {
        let cli = Cli::try_parse_from(["screenbridge", "config", "init", "-f"]).unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::Init { force }) => assert!(force),
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "screenbridge",
            "-v",
            "-c",
            "/etc/screenbridge.toml",
            "config",
            "show",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/screenbridge.toml")));
    }

    #[test]
    fn test_verbose_after_command() {
        let cli = Cli::try_parse_from(["screenbridge", "sessions", "list", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["screenbridge"]).is_err());
        assert!(Cli::try_parse_from(["screenbridge", "sessions"]).is_err());
        assert!(Cli::try_parse_from(["screenbridge", "config"]).is_err());
    }

    #[test]
    fn test_help_available() {
        let err = Cli::try_parse_from(["screenbridge", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
