//! Events reported by session components
//!
//! Components never mutate session state. Each one reports what happened
//! through these event types and the orchestrator decides what it means.

use std::net::SocketAddr;

// ── LinkEvent ─────────────────────────────────────────────────────────────────

/// An observation from the UDP command channel's passive listener.
///
/// Datagram content is not structurally parsed; replies are surfaced verbatim
/// so acknowledgment correlation can be added later without reshaping the
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An inbound datagram, lossy-decoded to text.
    Reply { from: SocketAddr, payload: String },
}

// ── TranscodeOutcome ──────────────────────────────────────────────────────────

/// Terminal outcome of one transcoder invocation.
///
/// Exactly one outcome is reported per started pipeline, no matter how the
/// process ends or how teardown races against its exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The process exited cleanly (code 0).
    Success,
    /// The supervisor was asked to stop it.
    Cancelled,
    /// Non-zero exit or killed externally; `log` holds the stderr tail.
    Failed { log: String },
}

impl TranscodeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TranscodeOutcome::Failed { .. })
    }

    /// One-line description for log output.
    pub fn summary(&self) -> String {
        match self {
            TranscodeOutcome::Success => "success".to_string(),
            TranscodeOutcome::Cancelled => "cancelled".to_string(),
            TranscodeOutcome::Failed { log } => {
                let first = log.lines().next().unwrap_or("no output");
                format!("failed: {first}")
            }
        }
    }
}

// ── PipelineEvent ─────────────────────────────────────────────────────────────

/// Events reported by the transcode pipeline supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A line from the transcoder's stderr.
    Stderr(String),
    /// The process reached its terminal outcome.
    Exited { outcome: TranscodeOutcome },
}

// ── PlaybackEvent ─────────────────────────────────────────────────────────────

/// Events reported by the playback surface (embedding player or the
/// headless readiness probe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// First media data consumed; the re-muxed stream is live.
    Ready,
    /// The player failed. Advisory: the stream endpoint stays up.
    Error { detail: String },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
