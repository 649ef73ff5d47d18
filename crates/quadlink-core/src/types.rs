//! Core domain type definitions

use serde::Serialize;

/// Connection lifecycle status of the drone session.
///
/// Exactly one value exists per session, owned by the orchestrator state.
/// Components never set it directly; they report events and the orchestrator
/// performs every transition in one place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session; all resources released
    #[default]
    Disconnected,
    /// Connect attempt in flight (preflight, bind, handshake)
    Connecting,
    /// Handshake complete; command channel open, stream not yet consumable
    Connected,
    /// Playback has confirmed the re-muxed stream is being consumed
    Streaming,
    /// A failure ended the session; the message is operator-facing
    Error(String),
}

impl SessionStatus {
    /// True while a session holds resources (channel, pipeline, or an
    /// attempt in flight).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Connected | SessionStatus::Streaming
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionStatus::Streaming)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionStatus::Error(_))
    }

    /// Short lowercase label for status lines and JSON events.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Error(message) => write!(f, "error ({message})"),
            other => f.write_str(other.label()),
        }
    }
}
