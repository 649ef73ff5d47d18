//! Signal-driven shutdown
//!
//! A session holds resources outside this process: a bound UDP socket, a
//! child transcoder, and a device left in streaming mode. Termination
//! signals therefore funnel into the same [`Message::Quit`] path the
//! operator's `q` takes, so the engine tears the session down instead of
//! leaking the child process.

use tokio::sync::mpsc;

use quadlink_core::prelude::*;

use crate::message::Message;

/// Spawn the background task that turns OS signals into a quit message.
pub fn spawn_signal_handler(tx: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!("Received {name}, requesting shutdown");
                let _ = tx.send(Message::Quit).await;
            }
            Err(e) => error!("Signal handler failed to install: {e}"),
        }
    });
}

/// Resolves with the name of the first termination signal delivered.
#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    // A vanished controlling terminal must also stop the stream.
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sighup.recv() => Ok("SIGHUP"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
