//! Playback surface bridge and the headless readiness probe
//!
//! Streaming is not declared when the transcoder starts serving; it is
//! declared when something actually consumes the re-muxed stream. An
//! embedding player reports that through [`PlaybackBridge`]; when the app
//! runs headless, [`spawn_probe`] is that consumer: a local HTTP client that
//! attaches to the stream endpoint, reports readiness on the first body
//! bytes, and keeps reading so a broken stream is noticed.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use quadlink_core::events::PlaybackEvent;
use quadlink_core::prelude::*;

use crate::message::Message;
use crate::state::AttemptId;

/// Retry cadence while the transcoder's HTTP listener is not up yet.
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Connection attempts before the probe gives up. The listener only appears
/// once video ingest has started, so this bounds how long we wait for the
/// device to actually stream.
const PROBE_MAX_RETRIES: u32 = 20;

/// Connect timeout per probe attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// The playback surface's line into the orchestrator.
///
/// Carries the attempt it was created for; reports from a bridge that
/// outlived its session are dropped by the update layer.
#[derive(Debug, Clone)]
pub struct PlaybackBridge {
    attempt: AttemptId,
    msg_tx: mpsc::Sender<Message>,
}

impl PlaybackBridge {
    pub fn new(attempt: AttemptId, msg_tx: mpsc::Sender<Message>) -> Self {
        Self { attempt, msg_tx }
    }

    /// Report that the stream is being consumed.
    pub async fn ready(&self) {
        let _ = self
            .msg_tx
            .send(Message::Playback {
                attempt: self.attempt,
                event: PlaybackEvent::Ready,
            })
            .await;
    }

    /// Report a playback failure. Advisory: the stream endpoint stays up and
    /// a consumer may reattach.
    pub async fn playback_error(&self, detail: impl Into<String>) {
        let _ = self
            .msg_tx
            .send(Message::Playback {
                attempt: self.attempt,
                event: PlaybackEvent::Error {
                    detail: detail.into(),
                },
            })
            .await;
    }
}

/// Spawn the readiness probe against the local stream endpoint.
pub fn spawn_probe(
    bridge: PlaybackBridge,
    url: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = probe_stream(&bridge, &url) => {}
            _ = shutdown_rx.changed() => {
                debug!("playback probe stopped by shutdown");
            }
        }
    })
}

/// Attach to the stream endpoint and consume it.
///
/// Connection refusals are expected at first: the transcoder opens its HTTP
/// listener only after ingest begins. Retries run on a fixed cadence until
/// the budget is spent.
async fn probe_stream(bridge: &PlaybackBridge, url: &str) {
    let client = match reqwest::Client::builder()
        .connect_timeout(PROBE_CONNECT_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("failed to build probe client: {e}");
            bridge.playback_error(format!("probe client: {e}")).await;
            return;
        }
    };

    let mut last_error = String::new();
    for tries in 1..=PROBE_MAX_RETRIES {
        match client.get(url).send().await {
            Ok(response) => {
                consume_stream(bridge, response).await;
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                trace!("probe connect {tries}/{PROBE_MAX_RETRIES} failed: {last_error}");
                tokio::time::sleep(PROBE_RETRY_DELAY).await;
            }
        }
    }

    warn!("stream endpoint never came up: {last_error}");
    bridge
        .playback_error(format!("stream endpoint never came up: {last_error}"))
        .await;
}

/// Read the response body until it breaks or ends.
///
/// The first chunk is the readiness signal. Everything after that is
/// consumed and discarded; we are standing in for a player, not saving
/// video.
async fn consume_stream(bridge: &PlaybackBridge, response: reqwest::Response) {
    let status = response.status();
    if !status.is_success() {
        warn!("stream endpoint answered {status}");
        bridge
            .playback_error(format!("stream endpoint answered {status}"))
            .await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut ready_sent = false;
    let mut consumed: u64 = 0;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                consumed += bytes.len() as u64;
                if !ready_sent {
                    info!("stream is live ({} bytes in first chunk)", bytes.len());
                    bridge.ready().await;
                    ready_sent = true;
                }
            }
            Err(e) => {
                warn!("stream read failed after {consumed} bytes: {e}");
                bridge.playback_error(format!("stream read failed: {e}")).await;
                return;
            }
        }
    }

    debug!("stream ended after {consumed} bytes");
    bridge.playback_error("stream ended").await;
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const MSG_TIMEOUT: Duration = Duration::from_secs(3);

    fn attempt_id() -> AttemptId {
        AttemptId(7)
    }

    async fn expect_playback(rx: &mut mpsc::Receiver<Message>) -> PlaybackEvent {
        let message = timeout(MSG_TIMEOUT, rx.recv())
            .await
            .expect("playback message within deadline")
            .unwrap();
        match message {
            Message::Playback { attempt, event } => {
                assert_eq!(attempt, attempt_id());
                event
            }
            other => panic!("expected Playback message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bridge_ready_tags_attempt() {
        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let bridge = PlaybackBridge::new(attempt_id(), msg_tx);

        bridge.ready().await;

        assert_eq!(expect_playback(&mut msg_rx).await, PlaybackEvent::Ready);
    }

    #[tokio::test]
    async fn test_bridge_error_carries_detail() {
        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let bridge = PlaybackBridge::new(attempt_id(), msg_tx);

        bridge.playback_error("demuxer stalled").await;

        match expect_playback(&mut msg_rx).await {
            PlaybackEvent::Error { detail } => assert_eq!(detail, "demuxer stalled"),
            other => panic!("expected Error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_reports_ready_on_first_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Serve headers plus one chunk, then hold the stream open.
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\n\r\n")
                .await
                .unwrap();
            conn.write_all(&[0u8; 1024]).await.unwrap();
            conn.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_probe(
            PlaybackBridge::new(attempt_id(), msg_tx),
            format!("http://127.0.0.1:{port}/"),
            shutdown_rx,
        );

        assert_eq!(expect_playback(&mut msg_rx).await, PlaybackEvent::Ready);
    }

    #[tokio::test]
    async fn test_probe_reports_error_when_stream_ends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Serve one chunk and close the connection.
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: video/mp4\r\n\r\n")
                .await
                .unwrap();
            conn.write_all(&[0u8; 512]).await.unwrap();
            conn.flush().await.unwrap();
            conn.shutdown().await.unwrap();
        });

        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        spawn_probe(
            PlaybackBridge::new(attempt_id(), msg_tx),
            format!("http://127.0.0.1:{port}/"),
            shutdown_rx,
        );

        assert_eq!(expect_playback(&mut msg_rx).await, PlaybackEvent::Ready);
        match expect_playback(&mut msg_rx).await {
            PlaybackEvent::Error { detail } => assert!(detail.contains("stream ended")),
            other => panic!("expected Error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_stops_on_shutdown() {
        let (msg_tx, mut msg_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Nothing listens on the target; the probe would retry for seconds.
        let handle = spawn_probe(
            PlaybackBridge::new(attempt_id(), msg_tx),
            "http://127.0.0.1:9/".to_string(),
            shutdown_rx,
        );

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("probe must stop on shutdown")
            .unwrap();
        assert!(msg_rx.try_recv().is_err());
    }
}
