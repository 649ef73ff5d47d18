//! quadlink - WiFi quadcopter link and video session supervisor
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::path::PathBuf;

use clap::Parser;

use quadlink_app::config::{self, Config};
use quadlink_app::{runner, Engine};
use quadlink_core::logging;

/// quadlink - WiFi quadcopter link and video session supervisor
#[derive(Parser, Debug)]
#[command(name = "quadlink")]
#[command(
    about = "Connect to a WiFi quadcopter and supervise its video stream",
    long_about = None
)]
struct Args {
    /// Path to a config file (defaults to the per-user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Device command address, overriding the config file
    #[arg(long, value_name = "IP")]
    device: Option<String>,

    /// Expected wireless network name prefix, overriding the config file
    #[arg(long, value_name = "PREFIX")]
    ssid_prefix: Option<String>,

    /// Disable the headless playback readiness probe
    #[arg(long)]
    no_probe: bool,

    /// Emit NDJSON session events instead of plain status lines
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging (to file, the terminal belongs to the operator)
    logging::init()?;

    let args = Args::parse();

    // Write the default config file on first run (non-fatal if it fails)
    if let Err(e) = config::init_config_file() {
        tracing::warn!("Could not write default config file: {}", e);
    }

    let mut config = config::load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    if args.show_config {
        print!("{}", config::render_config(&config)?);
        return Ok(());
    }

    let engine = Engine::new(config);
    runner::run(engine, args.json).await?;

    Ok(())
}

/// Fold CLI flags into the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(device) = &args.device {
        config.device.address = device.clone();
    }
    if let Some(prefix) = &args.ssid_prefix {
        config.device.ssid_prefix = prefix.clone();
    }
    if args.no_probe {
        config.playback.probe = false;
    }
}
