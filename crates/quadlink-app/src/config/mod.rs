//! Configuration loading for quadlink
//!
//! Supports:
//! - `<config dir>/quadlink/config.toml` - default location, lenient
//! - an explicit `--config` path - must exist and parse

pub mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use quadlink_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = "quadlink";

/// The default config file location under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load the configuration.
///
/// With an explicit path any problem is an error, since the operator asked
/// for that file. Without one, a missing or unparseable default file falls
/// back to defaults so a fresh install runs out of the box.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {:?}: {}", path, e)))?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::config_invalid(format!("Failed to parse {:?}: {}", path, e)))?;
        debug!("Loaded config from {:?}", path);
        return Ok(config);
    }

    let Some(path) = default_config_path() else {
        debug!("No platform config directory, using defaults");
        return Ok(Config::default());
    };

    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Ok(Config::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                debug!("Loaded config from {:?}", path);
                Ok(config)
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Ok(Config::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Ok(Config::default())
        }
    }
}

/// Create the default config file if missing.
///
/// Idempotent and non-fatal - callers log the error and move on.
pub fn init_config_file() -> Result<()> {
    let Some(path) = default_config_path() else {
        return Ok(());
    };

    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(&path, default_config_toml())
        .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    info!("Created default config at {:?}", path);

    Ok(())
}

/// The commented default configuration template.
pub fn default_config_toml() -> &'static str {
    r#"# quadlink configuration

[device]
address = "192.168.10.1"    # Drone IP on its own access point
command_port = 8889         # UDP port for SDK commands
video_port = 11111          # Local UDP port the raw H.264 stream arrives on
ssid_prefix = "TELLO-"      # Expected network name prefix (matched as prefix)

[link]
local_port = 0              # Local command port; 0 = let the OS pick
settle_delay_ms = 500       # Wait after each handshake command (no ack in the SDK)

[pipeline]
transcoder = "ffmpeg"       # Binary name on PATH, or an explicit path
http_port = 11112           # Local HTTP port the re-muxed stream is served on
restart_on_runtime_failure = false
max_restarts = 1

[playback]
probe = true                # Probe the stream endpoint and report readiness
"#
}

/// Render the effective configuration as TOML for `--show-config`.
pub fn render_config(config: &Config) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))
}
