//! Session error types with source classification

use thiserror::Error;

/// Result alias used across the quadlink crates
pub type Result<T> = std::result::Result<T, Error>;

/// Which subsystem an error originated from.
///
/// The orchestrator folds three independently-failing subsystems (network
/// link, command socket, transcode process) into one session status; the
/// category keeps the origin visible in logs and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Permission,
    Transport,
    Pipeline,
    Playback,
    Config,
    Internal,
}

impl ErrorCategory {
    /// Short lowercase label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Pipeline => "pipeline",
            ErrorCategory::Playback => "playback",
            ErrorCategory::Config => "config",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Everything that can fail across a session, grouped by subsystem
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Infrastructure
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Network Preflight
    // ─────────────────────────────────────────────────────────────
    #[error("No network connection")]
    NoConnection,

    #[error("Active network link is {link}, not WiFi")]
    WrongLinkType { link: String },

    #[error("Connected to \"{ssid}\" but expected a network starting with \"{expected}\"")]
    WrongNetwork { ssid: String, expected: String },

    // ─────────────────────────────────────────────────────────────
    // Permission
    // ─────────────────────────────────────────────────────────────
    #[error("Wireless permission denied: {message}")]
    PermissionDenied { message: String },

    // ─────────────────────────────────────────────────────────────
    // Command Channel
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to bind command socket on port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("Failed to send \"{command}\" to the device: {reason}")]
    CommandSend { command: String, reason: String },

    #[error("Command channel is closed")]
    LinkClosed,

    // ─────────────────────────────────────────────────────────────
    // Transcode Pipeline
    // ─────────────────────────────────────────────────────────────
    #[error("Transcoder not found: '{name}'. Ensure ffmpeg is installed and in your PATH.")]
    TranscoderNotFound { name: String },

    #[error("Failed to spawn transcode pipeline: {reason}")]
    PipelineSpawn { reason: String },

    #[error("Transcode pipeline failed: {detail}")]
    PipelineFailed { detail: String },

    // ─────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────
    #[error("Playback error: {detail}")]
    Playback { detail: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Message Plumbing
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn wrong_link_type(link: impl Into<String>) -> Self {
        Self::WrongLinkType { link: link.into() }
    }

    pub fn wrong_network(ssid: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::WrongNetwork {
            ssid: ssid.into(),
            expected: expected.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn bind(port: u16, reason: impl Into<String>) -> Self {
        Self::Bind {
            port,
            reason: reason.into(),
        }
    }

    pub fn command_send(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandSend {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn transcoder_not_found(name: impl Into<String>) -> Self {
        Self::TranscoderNotFound { name: name.into() }
    }

    pub fn pipeline_spawn(reason: impl Into<String>) -> Self {
        Self::PipelineSpawn {
            reason: reason.into(),
        }
    }

    pub fn pipeline_failed(detail: impl Into<String>) -> Self {
        Self::PipelineFailed {
            detail: detail.into(),
        }
    }

    pub fn playback(detail: impl Into<String>) -> Self {
        Self::Playback {
            detail: detail.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Classify this error by the subsystem that produced it.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NoConnection | Error::WrongLinkType { .. } | Error::WrongNetwork { .. } => {
                ErrorCategory::Network
            }
            Error::PermissionDenied { .. } => ErrorCategory::Permission,
            Error::Bind { .. } | Error::CommandSend { .. } | Error::LinkClosed => {
                ErrorCategory::Transport
            }
            Error::TranscoderNotFound { .. }
            | Error::PipelineSpawn { .. }
            | Error::PipelineFailed { .. } => ErrorCategory::Pipeline,
            Error::Playback { .. } => ErrorCategory::Playback,
            Error::Config { .. } | Error::ConfigInvalid { .. } => ErrorCategory::Config,
            Error::Io(_) | Error::ChannelSend { .. } | Error::ChannelClosed => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if the session survives this error.
    ///
    /// Playback errors are advisory (the stream endpoint stays up), and a
    /// failed internal forward only means the receiving loop is already
    /// gone. Everything else tears the current attempt or session down.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Playback { .. } | Error::ChannelSend { .. })
    }

    /// Check if retrying without operator intervention is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::TranscoderNotFound { .. } | Error::Config { .. } | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Context Extension
// ─────────────────────────────────────────────────────────────────

/// Context labels for fallible expressions, logged at the failure site.
pub trait ResultExt<T> {
    /// Label the error with fixed context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Label the error, building the context string only on failure.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
