//! Action handlers: UpdateAction dispatch and background task spawning
//!
//! Two async jobs run behind the message loop:
//!
//! - the connect attempt: permission gate, link preflight, socket bind, and
//!   the two-command SDK handshake, ending in `HandshakeComplete` or
//!   `ConnectAttemptFailed`
//! - the pipeline launch: transcoder spawn plus the event forwarder and the
//!   optional playback probe
//!
//! Both report back through messages tagged with the [`AttemptId`] that
//! started them, so the update layer can drop reports from attempts that
//! no longer exist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use quadlink_core::events::{LinkEvent, PipelineEvent};
use quadlink_core::prelude::*;
use quadlink_drone::transcode::egress_url;
use quadlink_drone::{
    preflight, CommandChannel, NetworkStatus, TranscodeId, TranscodePipeline, WirelessPermission,
};

use crate::config::Config;
use crate::handler::UpdateAction;
use crate::message::Message;
use crate::playback::{self, PlaybackBridge};
use crate::state::AttemptId;

/// First handshake command: switches the device out of its proprietary
/// protocol into SDK mode.
pub const SDK_MODE_COMMAND: &str = "command";

/// Second handshake command: starts the raw H.264 stream on the video port.
pub const STREAM_ON_COMMAND: &str = "streamon";

/// Event buffer between the pipeline supervisor and the forwarder.
const PIPELINE_EVENT_BUFFER: usize = 64;

/// Buffer for inbound device replies.
const REPLY_BUFFER: usize = 64;

/// Bound on waiting for a superseded attempt task to wind down.
const PRIOR_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Convenience type alias for attempt task tracking
pub type AttemptTaskMap = Arc<std::sync::Mutex<HashMap<AttemptId, tokio::task::JoinHandle<()>>>>;

/// Execute an action by spawning a background task
pub fn handle_action<N, P>(
    action: UpdateAction,
    config: &Config,
    msg_tx: mpsc::Sender<Message>,
    network: Arc<N>,
    permission: Arc<P>,
    attempt_tasks: AttemptTaskMap,
    shutdown_rx: watch::Receiver<bool>,
) where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    match action {
        UpdateAction::ConnectAttempt { attempt, cancel_rx } => {
            spawn_connect_attempt(
                attempt,
                config.clone(),
                msg_tx,
                network,
                permission,
                attempt_tasks,
                cancel_rx,
                shutdown_rx,
            );
        }

        UpdateAction::LaunchPipeline { attempt } => {
            spawn_pipeline_launch(attempt, config.clone(), msg_tx, shutdown_rx);
        }
    }
}

// ─────────────────────────────────────────────────────────
// Connect attempt
// ─────────────────────────────────────────────────────────

/// Spawn the connect attempt task and track its handle.
#[allow(clippy::too_many_arguments)]
fn spawn_connect_attempt<N, P>(
    attempt: AttemptId,
    config: Config,
    msg_tx: mpsc::Sender<Message>,
    network: Arc<N>,
    permission: Arc<P>,
    attempt_tasks: AttemptTaskMap,
    cancel_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
) where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    let tasks = attempt_tasks.clone();

    let handle = tokio::spawn(async move {
        // A cancelled predecessor may still be winding down toward its next
        // settle tick. Let it release its socket before this attempt binds,
        // or a fixed local port would hit a bind conflict.
        drain_prior_attempts(attempt, &tasks).await;

        let outcome = run_connect_attempt(
            attempt,
            &config,
            msg_tx.clone(),
            network,
            permission,
            cancel_rx,
            shutdown_rx,
        )
        .await;

        match outcome {
            Ok(Some(channel)) => {
                // Hand the live channel to the orchestrator. If the loop is
                // gone the channel drops here and closes itself.
                if msg_tx
                    .send(Message::HandshakeComplete { attempt, channel })
                    .await
                    .is_err()
                {
                    debug!("message loop closed before handshake handoff");
                }
            }
            Ok(None) => {
                info!("connect attempt {attempt} cancelled");
            }
            Err(e) => {
                warn!("connect attempt {attempt} failed: {e}");
                let _ = msg_tx
                    .send(Message::ConnectAttemptFailed {
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        // Remove this attempt's task from the tracking map
        if let Ok(mut guard) = tasks.lock() {
            guard.remove(&attempt);
        } else {
            warn!("attempt {attempt} task could not be removed from tracking (poisoned lock)");
        }
    });

    match attempt_tasks.lock() {
        Ok(mut guard) => {
            guard.insert(attempt, handle);
        }
        Err(e) => {
            warn!("attempt {attempt} task handle could not be tracked (poisoned lock): {e}");
        }
    }
}

/// Wait for earlier attempt tasks to finish before this one starts.
async fn drain_prior_attempts(attempt: AttemptId, tasks: &AttemptTaskMap) {
    let prior: Vec<_> = match tasks.lock() {
        Ok(mut guard) => {
            let ids: Vec<AttemptId> = guard.keys().copied().filter(|id| *id != attempt).collect();
            ids.into_iter()
                .filter_map(|id| guard.remove(&id).map(|handle| (id, handle)))
                .collect()
        }
        Err(_) => {
            warn!("attempt task map lock poisoned, skipping prior-attempt drain");
            Vec::new()
        }
    };

    for (prior_attempt, handle) in prior {
        if tokio::time::timeout(PRIOR_ATTEMPT_TIMEOUT, handle)
            .await
            .is_err()
        {
            warn!(
                "attempt {prior_attempt} still winding down after {:?}",
                PRIOR_ATTEMPT_TIMEOUT
            );
        }
    }
}

/// Run one connect attempt end to end.
///
/// Order matters: the permission gate runs before any network query, and the
/// preflight before any socket work. Returns the open channel on success, or
/// `None` when the attempt was cancelled mid-flight.
async fn run_connect_attempt<N, P>(
    attempt: AttemptId,
    config: &Config,
    msg_tx: mpsc::Sender<Message>,
    network: Arc<N>,
    permission: Arc<P>,
    mut cancel_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<Option<CommandChannel>>
where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    debug!("attempt {attempt}: checking wireless permission");
    permission.ensure().await?;

    debug!("attempt {attempt}: checking network link");
    let report = preflight::check(network.as_ref(), &config.device.ssid_prefix).await?;
    if let Some(ssid) = &report.ssid {
        info!("attempt {attempt}: on \"{ssid}\"");
    }

    let device = config.device.command_addr()?;
    let (reply_tx, reply_rx) = mpsc::channel::<LinkEvent>(REPLY_BUFFER);
    let channel = CommandChannel::open(config.link.local_port, device, reply_tx).await?;
    spawn_reply_bridge(attempt, reply_rx, msg_tx);

    // The two-command handshake. Sends are unacknowledged; the settle delay
    // is the only spacing the device gets between mode switch and stream-on.
    let delay = config.link.settle_delay();

    channel.send(SDK_MODE_COMMAND).await?;
    if !settle(delay, &mut cancel_rx, &mut shutdown_rx).await {
        return Ok(None);
    }

    channel.send(STREAM_ON_COMMAND).await?;
    if !settle(delay, &mut cancel_rx, &mut shutdown_rx).await {
        return Ok(None);
    }

    Ok(Some(channel))
}

/// Wait out a settle delay, or bail early on cancel or shutdown.
///
/// Any resolution of the cancel watch counts as cancelled, including the
/// sender being dropped: state teardown and attempt replacement both destroy
/// the sender.
async fn settle(
    delay: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel_rx.changed() => false,
        _ = shutdown_rx.changed() => false,
    }
}

/// Forward device replies into the message loop.
///
/// Ends when the channel closes (the listener drops its sender) or the
/// message loop goes away.
fn spawn_reply_bridge(
    attempt: AttemptId,
    mut reply_rx: mpsc::Receiver<LinkEvent>,
    msg_tx: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        while let Some(LinkEvent::Reply { from, payload }) = reply_rx.recv().await {
            if msg_tx
                .send(Message::DeviceReply { from, payload })
                .await
                .is_err()
            {
                break;
            }
        }
        trace!("reply bridge for attempt {attempt} stopped");
    });
}

// ─────────────────────────────────────────────────────────
// Pipeline launch
// ─────────────────────────────────────────────────────────

/// Spawn the transcoder plus its event forwarder and, when configured, the
/// playback readiness probe.
fn spawn_pipeline_launch(
    attempt: AttemptId,
    config: Config,
    msg_tx: mpsc::Sender<Message>,
    shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let (event_tx, event_rx) = mpsc::channel::<PipelineEvent>(PIPELINE_EVENT_BUFFER);

        let pipeline = match TranscodePipeline::spawn(
            &config.pipeline.transcoder,
            config.device.video_port,
            config.pipeline.http_port,
            event_tx,
        )
        .await
        {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("pipeline launch for attempt {attempt} failed: {e}");
                let _ = msg_tx
                    .send(Message::PipelineLaunchFailed {
                        attempt,
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        spawn_pipeline_forwarder(attempt, pipeline.id(), event_rx, msg_tx.clone());

        if config.playback.probe {
            playback::spawn_probe(
                PlaybackBridge::new(attempt, msg_tx.clone()),
                egress_url(config.pipeline.http_port),
                shutdown_rx,
            );
        }

        if msg_tx
            .send(Message::PipelineLaunched { attempt, pipeline })
            .await
            .is_err()
        {
            debug!("message loop closed before pipeline handoff");
        }
    });
}

/// Forward pipeline events into the message loop, stamped with the attempt
/// that launched the pipeline. Stops after the terminal event.
fn spawn_pipeline_forwarder(
    attempt: AttemptId,
    id: TranscodeId,
    mut event_rx: mpsc::Receiver<PipelineEvent>,
    msg_tx: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let terminal = matches!(event, PipelineEvent::Exited { .. });
            if msg_tx
                .send(Message::Pipeline { attempt, event })
                .await
                .is_err()
            {
                break;
            }
            if terminal {
                break;
            }
        }
        trace!("pipeline {id} event forwarder stopped");
    });
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quadlink_drone::test_utils::{AllowPermission, DenyPermission, FixedNetworkStatus};
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn test_config(command_port: u16) -> Config {
        let mut config = Config::default();
        config.device.address = "127.0.0.1".to_string();
        config.device.command_port = command_port;
        config.link.settle_delay_ms = 10;
        config
    }

    fn attempt_id() -> AttemptId {
        AttemptId(1)
    }

    async fn fake_drone() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    async fn recv_text(socket: &UdpSocket) -> (String, std::net::SocketAddr) {
        let mut buf = [0u8; 64];
        let (len, from) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .expect("datagram within deadline")
            .unwrap();
        (String::from_utf8_lossy(&buf[..len]).to_string(), from)
    }

    // ── settle ──

    #[tokio::test]
    async fn test_settle_completes_after_delay() {
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        assert!(settle(Duration::from_millis(5), &mut cancel_rx, &mut shutdown_rx).await);
    }

    #[tokio::test]
    async fn test_settle_bails_on_cancel_signal() {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        cancel_tx.send(true).unwrap();
        let settled = timeout(
            Duration::from_millis(100),
            settle(Duration::from_secs(30), &mut cancel_rx, &mut shutdown_rx),
        )
        .await
        .expect("settle must return promptly on cancel");
        assert!(!settled);
    }

    #[tokio::test]
    async fn test_settle_bails_when_cancel_sender_dropped() {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        drop(cancel_tx);
        let settled = timeout(
            Duration::from_millis(100),
            settle(Duration::from_secs(30), &mut cancel_rx, &mut shutdown_rx),
        )
        .await
        .expect("settle must return promptly when the attempt is replaced");
        assert!(!settled);
    }

    // ── prior-attempt drain ──

    #[tokio::test]
    async fn test_prior_attempts_drained_before_new_one() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let tasks: AttemptTaskMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let old = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        tasks.lock().unwrap().insert(AttemptId(1), old);

        drain_prior_attempts(AttemptId(2), &tasks).await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(tasks.lock().unwrap().is_empty());
    }

    // ── run_connect_attempt ──

    #[tokio::test]
    async fn test_handshake_sends_commands_in_order() {
        let (drone, port) = fake_drone().await;
        let config = test_config(port);
        let (msg_tx, _msg_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = run_connect_attempt(
            attempt_id(),
            &config,
            msg_tx,
            Arc::new(FixedNetworkStatus::wifi("TELLO-C3D5E2")),
            Arc::new(AllowPermission),
            cancel_rx,
            shutdown_rx,
        )
        .await
        .unwrap();

        let channel = result.expect("handshake must complete");
        assert!(!channel.is_closed());

        let (first, _) = recv_text(&drone).await;
        let (second, _) = recv_text(&drone).await;
        assert_eq!(first, SDK_MODE_COMMAND);
        assert_eq!(second, STREAM_ON_COMMAND);
    }

    #[tokio::test]
    async fn test_attempt_fails_on_wrong_network() {
        let (_drone, port) = fake_drone().await;
        let config = test_config(port);
        let (msg_tx, _msg_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = run_connect_attempt(
            attempt_id(),
            &config,
            msg_tx,
            Arc::new(FixedNetworkStatus::wifi("HomeWifi-5G")),
            Arc::new(AllowPermission),
            cancel_rx,
            shutdown_rx,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("HomeWifi-5G"));
    }

    #[tokio::test]
    async fn test_attempt_fails_on_denied_permission() {
        let (_drone, port) = fake_drone().await;
        let config = test_config(port);
        let (msg_tx, _msg_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = run_connect_attempt(
            attempt_id(),
            &config,
            msg_tx,
            Arc::new(FixedNetworkStatus::wifi("TELLO-C3D5E2")),
            Arc::new(DenyPermission::new("revoked in system settings")),
            cancel_rx,
            shutdown_rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_attempt_cancelled_mid_settle() {
        let (drone, port) = fake_drone().await;
        let mut config = test_config(port);
        config.link.settle_delay_ms = 30_000;
        let (msg_tx, _msg_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            async move {
                run_connect_attempt(
                    attempt_id(),
                    &config,
                    msg_tx,
                    Arc::new(FixedNetworkStatus::wifi("TELLO-C3D5E2")),
                    Arc::new(AllowPermission),
                    cancel_rx,
                    shutdown_rx,
                )
                .await
            }
        });

        // Cancel once the first command is on the wire.
        let (first, _) = recv_text(&drone).await;
        assert_eq!(first, SDK_MODE_COMMAND);
        cancel_tx.send(true).unwrap();

        let result = timeout(Duration::from_secs(1), task)
            .await
            .expect("cancel must cut the settle short")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_device_replies_reach_message_loop() {
        let (drone, port) = fake_drone().await;
        let config = test_config(port);
        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        // Echo "ok" back to whoever sends us a command.
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((_, from)) = drone.recv_from(&mut buf).await {
                let _ = drone.send_to(b"ok", from).await;
            }
        });

        let channel = run_connect_attempt(
            attempt_id(),
            &config,
            msg_tx,
            Arc::new(FixedNetworkStatus::wifi("TELLO-C3D5E2")),
            Arc::new(AllowPermission),
            cancel_rx,
            shutdown_rx,
        )
        .await
        .unwrap()
        .expect("handshake must complete");

        let message = timeout(RECV_TIMEOUT, msg_rx.recv())
            .await
            .expect("reply within deadline")
            .unwrap();
        match message {
            Message::DeviceReply { payload, .. } => assert_eq!(payload, "ok"),
            other => panic!("expected DeviceReply, got {other:?}"),
        }

        channel.close();
    }
}
