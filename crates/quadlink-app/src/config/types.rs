//! Configuration types for quadlink
//!
//! Defines:
//! - `Config` - The full session configuration
//! - Per-section types: device addressing, link tuning, pipeline, playback

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quadlink_core::prelude::*;

/// Session configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Device addressing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// IP address of the drone on its own access point
    #[serde(default = "default_device_address")]
    pub address: String,

    /// UDP port the drone listens on for SDK commands
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Local UDP port the drone pushes raw H.264 to once streaming is on
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// The network name prefix the drone's access point advertises.
    /// Each unit appends its own suffix, so matching is prefix-only.
    #[serde(default = "default_ssid_prefix")]
    pub ssid_prefix: String,
}

impl DeviceConfig {
    /// The drone's command endpoint as a socket address.
    pub fn command_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| Error::config_invalid(format!("bad device address {:?}", self.address)))?;
        Ok(SocketAddr::new(ip, self.command_port))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_device_address(),
            command_port: default_command_port(),
            video_port: default_video_port(),
            ssid_prefix: default_ssid_prefix(),
        }
    }
}

fn default_device_address() -> String {
    "192.168.10.1".to_string()
}

fn default_command_port() -> u16 {
    8889
}

fn default_video_port() -> u16 {
    11111
}

fn default_ssid_prefix() -> String {
    "TELLO-".to_string()
}

/// Command link tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Local UDP port to bind for the command channel. 0 lets the OS pick.
    #[serde(default)]
    pub local_port: u16,

    /// How long to let the device settle after each handshake command.
    /// The SDK gives no acknowledgement, so this is a fixed wait.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl LinkConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

/// Video pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Transcoder binary: a bare name looked up on PATH or an explicit path
    #[serde(default = "default_transcoder")]
    pub transcoder: String,

    /// Local HTTP port the re-muxed stream is served on
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Relaunch the transcoder when it fails mid-session instead of
    /// dropping the session into the error state
    #[serde(default)]
    pub restart_on_runtime_failure: bool,

    /// Relaunch budget per connection when restarts are enabled
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transcoder: default_transcoder(),
            http_port: default_http_port(),
            restart_on_runtime_failure: false,
            max_restarts: default_max_restarts(),
        }
    }
}

fn default_transcoder() -> String {
    "ffmpeg".to_string()
}

fn default_http_port() -> u16 {
    11112
}

fn default_max_restarts() -> u32 {
    1
}

/// Playback settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Probe the local stream endpoint and report readiness. Disable when an
    /// external player attaches through the playback bridge instead.
    #[serde(default = "default_true")]
    pub probe: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { probe: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        self.device.command_addr()?;

        if self.device.command_port == 0 {
            return Err(Error::config_invalid("device.command_port must not be 0"));
        }
        if self.device.video_port == 0 {
            return Err(Error::config_invalid("device.video_port must not be 0"));
        }
        if self.device.ssid_prefix.is_empty() {
            return Err(Error::config_invalid("device.ssid_prefix must not be empty"));
        }
        if self.pipeline.http_port == 0 {
            return Err(Error::config_invalid("pipeline.http_port must not be 0"));
        }
        if self.pipeline.http_port == self.device.video_port {
            return Err(Error::config_invalid(
                "pipeline.http_port and device.video_port must differ",
            ));
        }
        if self.pipeline.transcoder.is_empty() {
            return Err(Error::config_invalid("pipeline.transcoder must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.address, "192.168.10.1");
        assert_eq!(config.device.command_port, 8889);
        assert_eq!(config.device.video_port, 11111);
        assert_eq!(config.device.ssid_prefix, "TELLO-");
        assert_eq!(config.link.local_port, 0);
        assert_eq!(config.link.settle_delay_ms, 500);
        assert_eq!(config.pipeline.transcoder, "ffmpeg");
        assert_eq!(config.pipeline.http_port, 11112);
        assert!(!config.pipeline.restart_on_runtime_failure);
        assert!(config.playback.probe);
    }

    #[test]
    fn test_command_addr_combines_address_and_port() {
        let config = Config::default();
        let addr = config.device.command_addr().unwrap();
        assert_eq!(addr.to_string(), "192.168.10.1:8889");
    }

    #[test]
    fn test_bad_address_is_invalid() {
        let mut config = Config::default();
        config.device.address = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prefix_is_invalid() {
        let mut config = Config::default();
        config.device.ssid_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_collision_is_invalid() {
        let mut config = Config::default();
        config.pipeline.http_port = config.device.video_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [device]
            address = "192.168.10.2"

            [pipeline]
            restart_on_runtime_failure = true
            "#,
        )
        .unwrap();

        assert_eq!(config.device.address, "192.168.10.2");
        assert_eq!(config.device.command_port, 8889);
        assert!(config.pipeline.restart_on_runtime_failure);
        assert_eq!(config.pipeline.max_restarts, 1);
        assert_eq!(config.link.settle_delay_ms, 500);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settle_delay_duration() {
        let mut config = Config::default();
        config.link.settle_delay_ms = 250;
        assert_eq!(config.link.settle_delay(), Duration::from_millis(250));
    }
}
