//! Session state (the TEA model)
//!
//! `ConnState` holds everything the orchestrator knows: the visible
//! [`SessionStatus`], the live link and pipeline resources, and the attempt
//! generation used to discard messages from torn-down attempts.

use tokio::sync::watch;

use quadlink_core::types::SessionStatus;
use quadlink_drone::{CommandChannel, TranscodePipeline};

use crate::config::Config;

/// Identity of one connect attempt.
///
/// Every message produced by an attempt's background work carries the id the
/// attempt was started with. A teardown bumps the current generation, so
/// messages from the old attempt no longer match and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(pub(crate) u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Orchestrator state for one drone session.
#[derive(Debug)]
pub struct ConnState {
    /// The externally visible session status
    pub status: SessionStatus,

    /// Loaded configuration (immutable for the process lifetime)
    pub config: Config,

    /// Monotonic attempt counter
    attempt_seq: u64,

    /// The attempt currently allowed to report progress. Spans the whole
    /// connection: set when the attempt starts, cleared only on teardown.
    pub current_attempt: Option<AttemptId>,

    /// Cancels the in-flight attempt's settling delays
    attempt_cancel: Option<watch::Sender<bool>>,

    /// Live command channel, present from handshake completion to teardown
    pub channel: Option<CommandChannel>,

    /// Live transcode pipeline
    pub pipeline: Option<TranscodePipeline>,

    /// Pipeline relaunches consumed for the current connection
    pub restarts_used: u32,

    /// Most recent failure, kept for status reporting
    pub last_error: Option<String>,

    quitting: bool,
}

impl ConnState {
    pub fn new(config: Config) -> Self {
        Self {
            status: SessionStatus::default(),
            config,
            attempt_seq: 0,
            current_attempt: None,
            attempt_cancel: None,
            channel: None,
            pipeline: None,
            restarts_used: 0,
            last_error: None,
            quitting: false,
        }
    }

    /// Start a new attempt generation.
    ///
    /// Returns the attempt id and the cancel receiver its background task
    /// watches. Replacing the previous cancel sender also cancels any
    /// still-running older attempt.
    pub fn begin_attempt(&mut self) -> (AttemptId, watch::Receiver<bool>) {
        self.attempt_seq += 1;
        let attempt = AttemptId(self.attempt_seq);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.attempt_cancel = Some(cancel_tx);
        self.current_attempt = Some(attempt);
        (attempt, cancel_rx)
    }

    /// Whether a message stamped with `attempt` belongs to the live
    /// connection generation.
    pub fn is_current(&self, attempt: AttemptId) -> bool {
        self.current_attempt == Some(attempt)
    }

    /// Cancel the in-flight attempt, if any.
    pub fn cancel_attempt(&mut self) {
        if let Some(cancel) = self.attempt_cancel.take() {
            let _ = cancel.send(true);
        }
    }

    /// Take the pipeline out of the state, leaving `None`.
    pub fn take_pipeline(&mut self) -> Option<TranscodePipeline> {
        self.pipeline.take()
    }

    /// Release every resource of the current connection generation.
    ///
    /// Cancels the in-flight attempt, closes the command channel, kills the
    /// pipeline, and clears the generation so any message still in flight
    /// from this connection is dropped as stale. Idempotent; the caller sets
    /// the resulting status.
    pub fn teardown(&mut self) {
        self.cancel_attempt();
        self.current_attempt = None;
        self.restarts_used = 0;

        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.cancel();
        }
    }

    /// Enter the error state with the given message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.last_error = Some(message.clone());
        self.status = SessionStatus::Error(message);
    }

    pub fn request_quit(&mut self) {
        self.quitting = true;
    }

    pub fn should_quit(&self) -> bool {
        self.quitting
    }
}
