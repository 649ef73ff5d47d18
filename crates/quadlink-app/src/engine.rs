//! Session engine: owns state and the message loop plumbing.
//!
//! The engine wires the pure `handler::update` function to the async side
//! effects in `actions`. Frontends pump messages through `process_message`
//! and call `shutdown` when done; everything else (connect attempts, the
//! transcode pipeline, playback probing) runs on background tasks that
//! report back through the message channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use quadlink_core::prelude::*;
use quadlink_core::types::SessionStatus;
use quadlink_drone::{NetworkStatus, SystemNetworkStatus, SystemPermission, WirelessPermission};

use crate::actions::{self, AttemptTaskMap};
use crate::config::Config;
use crate::handler;
use crate::message::Message;
use crate::signals;
use crate::state::ConnState;

/// How long to wait for a background attempt task during shutdown.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the transcoder to exit during shutdown.
const PIPELINE_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Core session engine, independent of any frontend.
///
/// Generic over the network status and wireless permission providers so
/// tests can substitute fixed ones; production code uses [`Engine::new`]
/// which picks the system-backed implementations.
pub struct Engine<N = SystemNetworkStatus, P = SystemPermission> {
    /// Session state (owned, no locks)
    pub state: ConnState,
    /// Message sender (cloned for input sources and background tasks)
    pub msg_tx: mpsc::Sender<Message>,
    /// Message receiver (drained by the frontend loop)
    pub msg_rx: mpsc::Receiver<Message>,
    /// Background connect-attempt tasks, keyed by attempt
    pub attempt_tasks: AttemptTaskMap,
    /// Shutdown signal sender
    pub shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver (cloned for background tasks)
    pub shutdown_rx: watch::Receiver<bool>,
    network: Arc<N>,
    permission: Arc<P>,
}

impl Engine {
    /// Create a new engine with the system-backed providers.
    pub fn new(config: Config) -> Self {
        Self::with_providers(config, SystemNetworkStatus, SystemPermission)
    }
}

impl<N, P> Engine<N, P>
where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    /// Create an engine with explicit providers.
    pub fn with_providers(config: Config, network: N, permission: P) -> Self {
        // 1. Create state
        let state = ConnState::new(config);

        // 2. Create message channel
        let (msg_tx, msg_rx) = mpsc::channel::<Message>(256);

        // 3. Create shutdown channel
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // 4. Create attempt task map
        let attempt_tasks: AttemptTaskMap = Arc::new(std::sync::Mutex::new(HashMap::new()));

        // 5. Spawn signal handler
        signals::spawn_signal_handler(msg_tx.clone());

        Self {
            state,
            msg_tx,
            msg_rx,
            attempt_tasks,
            shutdown_tx,
            shutdown_rx,
            network: Arc::new(network),
            permission: Arc::new(permission),
        }
    }

    /// Process a single message: run the update function, dispatch any
    /// resulting action, and follow up on any chained message.
    pub fn process_message(&mut self, msg: Message) {
        let mut current = Some(msg);

        while let Some(msg) = current.take() {
            trace!("Processing message: {}", msg.kind());

            let result = handler::update(&mut self.state, msg);

            if let Some(action) = result.action {
                actions::handle_action(
                    action,
                    &self.state.config,
                    self.msg_tx.clone(),
                    Arc::clone(&self.network),
                    Arc::clone(&self.permission),
                    self.attempt_tasks.clone(),
                    self.shutdown_rx.clone(),
                );
            }

            current = result.message;
        }
    }

    /// Get a clone of the message sender for spawning input sources.
    pub fn msg_sender(&self) -> mpsc::Sender<Message> {
        self.msg_tx.clone()
    }

    /// Get a clone of the shutdown receiver for background tasks.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Check if the application should quit.
    pub fn should_quit(&self) -> bool {
        self.state.should_quit()
    }

    /// Initiate shutdown: signal background tasks, stop the pipeline,
    /// release the link, and drain remaining attempt tasks.
    pub async fn shutdown(&mut self) {
        // Signal all background tasks to stop
        let _ = self.shutdown_tx.send(true);

        // Stop the transcode pipeline and wait for the process to die
        if let Some(mut pipeline) = self.state.take_pipeline() {
            pipeline.cancel();
            if !pipeline.wait_until_exited(PIPELINE_EXIT_TIMEOUT).await {
                warn!("Transcoder did not exit within {:?}", PIPELINE_EXIT_TIMEOUT);
            }
        }

        // Release the command link and any in-flight attempt
        self.state.teardown();
        self.state.status = SessionStatus::Disconnected;

        // Drain remaining attempt tasks with timeout
        let tasks: Vec<_> = match self.attempt_tasks.lock() {
            Ok(mut map) => map.drain().collect(),
            Err(_) => {
                warn!("Attempt task map lock poisoned during shutdown");
                Vec::new()
            }
        };

        for (attempt, handle) in tasks {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Attempt {} cleaned up", attempt),
                Ok(Err(e)) => warn!("Attempt {} panicked: {}", attempt, e),
                Err(_) => warn!("Attempt {} cleanup timed out", attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadlink_drone::test_utils::{AllowPermission, FixedNetworkStatus};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.link.settle_delay_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_engine_new_creates_valid_state() {
        let engine = Engine::new(Config::default());

        assert!(!engine.should_quit());
        assert_eq!(engine.state.status, SessionStatus::Disconnected);
        assert!(engine.state.current_attempt.is_none());
    }

    #[tokio::test]
    async fn test_engine_process_quit_message() {
        let mut engine = Engine::new(Config::default());

        engine.process_message(Message::Quit);

        assert!(engine.should_quit());
        assert_eq!(engine.state.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_engine_shutdown_with_no_session() {
        let mut engine = Engine::new(Config::default());

        engine.shutdown().await;

        assert_eq!(engine.state.status, SessionStatus::Disconnected);
        assert!(*engine.shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_failed_attempt_reports_back() {
        let mut engine =
            Engine::with_providers(test_config(), FixedNetworkStatus::wired(), AllowPermission);

        engine.process_message(Message::Connect);
        assert_eq!(engine.state.status, SessionStatus::Connecting);

        // The spawned attempt hits the wired network and reports failure
        let msg = tokio::time::timeout(Duration::from_secs(2), engine.msg_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.kind(), "ConnectAttemptFailed");

        engine.process_message(msg);
        assert!(engine.state.status.is_error());

        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_cancels_pipeline() {
        use quadlink_core::events::{PipelineEvent, TranscodeOutcome};
        use quadlink_drone::TranscodePipeline;
        use std::path::Path;

        let mut engine = Engine::new(Config::default());

        let (tx, mut rx) = mpsc::channel(16);
        let args = vec!["-c".to_string(), "sleep 60".to_string()];
        let pipeline = TranscodePipeline::spawn_with(Path::new("sh"), &args, tx)
            .expect("spawn stand-in pipeline");
        engine.state.pipeline = Some(pipeline);

        engine.shutdown().await;

        assert!(engine.state.pipeline.is_none());
        let exited = loop {
            match rx.recv().await {
                Some(PipelineEvent::Exited { outcome, .. }) => break outcome,
                Some(_) => continue,
                None => panic!("event channel closed before exit"),
            }
        };
        assert_eq!(exited, TranscodeOutcome::Cancelled);
    }
}
