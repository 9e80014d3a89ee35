use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use threatsync::app::{Engine, EngineOptions};
use threatsync::config::Config;
use threatsync::logging;

#[derive(Parser, Debug)]
#[command(name = "threatsync")]
#[command(about = "Adaptive sync and lifecycle engine for a local security-intel cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./threatsync.yaml, then $XDG_CONFIG_HOME/threatsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// JSON seed snapshot to load before the first tick
  #[arg(short, long)]
  seed: Option<PathBuf>,

  /// Run a single tick and print its summary as JSON
  #[arg(long)]
  once: bool,

  /// Poll simulated feeds that emit random indicators
  #[arg(long)]
  simulate_feeds: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let engine = Engine::new(
    config,
    EngineOptions {
      seed: args.seed,
      simulate_feeds: args.simulate_feeds,
    },
  )?;

  if args.once {
    let summary = engine.run_once().await?;
    let json = serde_json::to_string_pretty(&summary).map_err(|e| eyre!("Failed to encode summary: {}", e))?;
    println!("{}", json);
  } else {
    engine.run().await?;
  }

  Ok(())
}
