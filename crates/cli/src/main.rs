//! ToolRelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway
//! - `tools`   List the capabilities the registry currently serves
//! - `doctor`  Check config, capability store and model provider
//! - `init`    Write a default config file

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use toolrelay_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "toolrelay",
    about = "ToolRelay: model tool-calling over plain HTTP capabilities",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (default: ~/.toolrelay/config.toml)
    #[arg(short, long, global = true, env = "TOOLRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the loaded capability snapshot
    Tools {
        /// Print the model-facing schema as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and dependencies
    Doctor,

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// The config file path in effect.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load config from `path` and apply environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from(path).map_err(|e| format!("Failed to load config: {e}"))?;
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .map_err(|e| format!("Invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let path = config_path(cli.config.as_deref());

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&path, port).await?,
        Commands::Tools { json } => commands::tools::run(&path, json).await?,
        Commands::Doctor => commands::doctor::run(&path).await?,
        Commands::Init { force } => commands::init::run(&path, force)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_with_port() {
        let cli = Cli::try_parse_from(["toolrelay", "-v", "serve", "--port", "9000"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }

    #[test]
    fn explicit_config_path_wins() {
        let p = config_path(Some(Path::new("/etc/toolrelay.toml")));
        assert_eq!(p, PathBuf::from("/etc/toolrelay.toml"));
        assert!(config_path(None).ends_with(".toolrelay/config.toml"));
    }

    #[test]
    fn load_config_reads_the_given_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_round_trips = 3\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.max_round_trips, 3);

        std::fs::write(&path, "[agent]\nmax_round_trips = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
