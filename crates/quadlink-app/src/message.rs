//! Message types for the session orchestrator (TEA pattern)

use std::net::SocketAddr;

use quadlink_core::events::{PipelineEvent, PlaybackEvent};
use quadlink_drone::{CommandChannel, TranscodePipeline};

use crate::state::AttemptId;

/// All messages flowing through the orchestrator loop.
///
/// Operator commands come from the runner (stdin, signals); the rest are
/// progress reports from attempt, pipeline, and playback tasks, each stamped
/// with the [`AttemptId`] of the connection generation that produced it.
#[derive(Debug)]
pub enum Message {
    /// Operator asked to connect to the drone
    Connect,

    /// Operator asked to disconnect and release everything
    Disconnect,

    /// Quit: tear down like Disconnect, then exit the loop
    Quit,

    // ─────────────────────────────────────────────────────────
    // Connect Attempt Progress
    // ─────────────────────────────────────────────────────────
    /// The attempt failed at any stage (permission, preflight, bind, send)
    ConnectAttemptFailed { attempt: AttemptId, error: String },

    /// Both handshake commands were sent and their settling delays elapsed.
    /// Carries the live command channel, which the orchestrator now owns.
    HandshakeComplete {
        attempt: AttemptId,
        channel: CommandChannel,
    },

    // ─────────────────────────────────────────────────────────
    // Pipeline Messages
    // ─────────────────────────────────────────────────────────
    /// The transcoder process started; the orchestrator takes ownership
    PipelineLaunched {
        attempt: AttemptId,
        pipeline: TranscodePipeline,
    },

    /// The transcoder could not be resolved or spawned
    PipelineLaunchFailed { attempt: AttemptId, error: String },

    /// Forwarded event from the running pipeline (stderr line or exit)
    Pipeline {
        attempt: AttemptId,
        event: PipelineEvent,
    },

    // ─────────────────────────────────────────────────────────
    // Playback Messages
    // ─────────────────────────────────────────────────────────
    /// Forwarded event from the playback side (probe or external player)
    Playback {
        attempt: AttemptId,
        event: PlaybackEvent,
    },

    // ─────────────────────────────────────────────────────────
    // Device Messages
    // ─────────────────────────────────────────────────────────
    /// A datagram arrived on the command channel. Informational only; the
    /// SDK handshake does not wait for acknowledgements.
    DeviceReply { from: SocketAddr, payload: String },
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect => "Connect",
            Message::Disconnect => "Disconnect",
            Message::Quit => "Quit",
            Message::ConnectAttemptFailed { .. } => "ConnectAttemptFailed",
            Message::HandshakeComplete { .. } => "HandshakeComplete",
            Message::PipelineLaunched { .. } => "PipelineLaunched",
            Message::PipelineLaunchFailed { .. } => "PipelineLaunchFailed",
            Message::Pipeline { .. } => "Pipeline",
            Message::Playback { .. } => "Playback",
            Message::DeviceReply { .. } => "DeviceReply",
        }
    }
}
