mod commands;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use commands::Command;
use prefs_core::PrefsConfig;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prefs")]
#[command(about = "Inspect and edit a preference store", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct StoreArgs {
    /// Config file (default: $PREFS_CONFIG_PATH or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the native preference files
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Directory holding legacy pref_store.ini files
    #[arg(long, global = true)]
    legacy_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    scope: Option<String>,
}

impl StoreArgs {
    fn resolve_config(&self) -> Result<PrefsConfig> {
        let mut config = PrefsConfig::resolve(self.config.as_deref())
            .context("failed to load preferences config")?;
        if let Some(dir) = &self.state_dir {
            config.state_location = Some(dir.clone());
        }
        if let Some(dir) = &self.legacy_dir {
            config.legacy_location = Some(dir.clone());
        }
        if let Some(scope) = &self.scope {
            config.scope = scope.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = cli.store.resolve_config()?;
    tracing::debug!(
        event = "config_resolved",
        scope = %config.scope,
        state = ?config.state_location,
        legacy = ?config.legacy_location
    );
    let output = commands::run(&config, cli.command)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
