//! UDP command channel to the drone
//!
//! The device speaks a plaintext ASCII datagram protocol on a fixed port.
//! One channel is bound per connect attempt and lives until teardown. Sends
//! carry a weak guarantee only: success means the datagram left the local
//! stack, nothing more. Every inbound datagram is forwarded verbatim by a
//! passive listener; nothing here waits for acknowledgments.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use quadlink_core::events::LinkEvent;
use quadlink_core::prelude::*;

/// Largest datagram we expect back from the device. Replies are short ASCII
/// ("ok", "error", a battery figure), so this is generous.
const REPLY_BUFFER_SIZE: usize = 2048;

/// One bound UDP endpoint speaking to the drone.
///
/// Exists only while a session is being established or held. `close()` is
/// idempotent and also runs on drop, so the endpoint is released within one
/// teardown cycle no matter which path tears the session down.
pub struct CommandChannel {
    socket: Arc<UdpSocket>,
    device: SocketAddr,
    closed: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl CommandChannel {
    /// Bind the local endpoint and attach the reply listener.
    ///
    /// `local_port` of 0 binds an ephemeral port. A port that is already
    /// taken fails here, naming the port; the caller treats that as fatal to
    /// the attempt rather than retrying another port.
    pub async fn open(
        local_port: u16,
        device: SocketAddr,
        reply_tx: mpsc::Sender<LinkEvent>,
    ) -> Result<CommandChannel> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .map_err(|e| Error::bind(local_port, e.to_string()))?;
        let socket = Arc::new(socket);

        let local = socket.local_addr()?;
        info!("command channel open on {local} -> {device}");

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(listen_for_replies(Arc::clone(&socket), reply_tx, stop_rx));

        Ok(CommandChannel {
            socket,
            device,
            closed: Arc::new(AtomicBool::new(false)),
            stop_tx,
        })
    }

    /// Send one command datagram to the device.
    ///
    /// Success does not confirm delivery or device-side execution. Fails
    /// once the channel has been closed.
    pub async fn send(&self, command: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::LinkClosed);
        }

        self.socket
            .send_to(command.as_bytes(), self.device)
            .await
            .map_err(|e| Error::command_send(command, e.to_string()))?;

        debug!("sent \"{command}\" to {}", self.device);
        Ok(())
    }

    /// Stop the listener and mark the channel closed.
    ///
    /// Idempotent: later calls (including the one from `Drop`) are no-ops.
    /// The OS endpoint is released once the listener task observes the stop
    /// signal and drops its socket handle.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(true);
        info!("command channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Local endpoint the channel is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn device_addr(&self) -> SocketAddr {
        self.device
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("device", &self.device)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Forward every inbound datagram until the stop signal fires or the
/// orchestrator side of the event channel goes away.
async fn listen_for_replies(
    socket: Arc<UdpSocket>,
    reply_tx: mpsc::Sender<LinkEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut buf = [0u8; REPLY_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    let payload = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                    debug!("reply from {from}: {payload}");
                    if reply_tx.send(LinkEvent::Reply { from, payload }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("recv error on command socket: {e}");
                    break;
                }
            }
        }
    }

    trace!("reply listener stopped");
}
