//! Handler module - TEA update function
//!
//! `update()` is the only place session status changes. It consumes one
//! message, mutates [`ConnState`](crate::state::ConnState), and hands any
//! side effects back as an [`UpdateAction`] for the engine to dispatch.

pub(crate) mod update;


use tokio::sync::watch;

use crate::message::Message;
use crate::state::AttemptId;

// The single entry point
pub use update::update;

/// Actions the engine should perform after update
#[derive(Debug, Clone)]
pub enum UpdateAction {
    /// Run a full connect attempt in the background:
    /// permission gate, preflight, channel open, handshake.
    ConnectAttempt {
        attempt: AttemptId,
        cancel_rx: watch::Receiver<bool>,
    },

    /// Launch the transcode pipeline for the live connection
    LaunchPipeline { attempt: AttemptId },
}

/// What one `update()` call asks the engine to do next
#[derive(Debug, Default)]
pub struct UpdateResult {
    /// Message to feed straight back through `update()`
    pub message: Option<Message>,
    /// Side effect for the engine to dispatch
    pub action: Option<UpdateAction>,
}

impl UpdateResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn message(msg: Message) -> Self {
        Self {
            message: Some(msg),
            action: None,
        }
    }

    pub fn action(action: UpdateAction) -> Self {
        Self {
            message: None,
            action: Some(action),
        }
    }
}
