//! Headless runner - main event loop without an embedding player
//!
//! Drains the engine's message channel, reports session transitions to the
//! operator (plain lines, or NDJSON events with `--json`), and reads line
//! commands from stdin.

use tokio::sync::mpsc;

use quadlink_core::prelude::*;
use quadlink_core::types::SessionStatus;
use quadlink_drone::transcode::egress_url;
use quadlink_drone::{NetworkStatus, WirelessPermission};

use crate::engine::Engine;
use crate::message::Message;
use crate::report::SessionEvent;
use crate::state::ConnState;

/// Run the session loop until quit.
pub async fn run<N, P>(mut engine: Engine<N, P>, json: bool) -> Result<()>
where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    info!("═══════════════════════════════════════════════════════");
    info!("quadlink starting");
    info!(
        "Device: {}:{}",
        engine.state.config.device.address, engine.state.config.device.command_port
    );
    info!("═══════════════════════════════════════════════════════");

    // Spawn the stdin reader for operator commands
    let stdin_tx = engine.msg_sender();
    std::thread::spawn(move || {
        stdin_reader_blocking(stdin_tx);
    });

    // Dial immediately; after a failure the operator can redial with `c`.
    let before = engine.state.status.clone();
    engine.process_message(Message::Connect);
    report_transition(&engine.state, &before, json);

    // Main event loop
    let result = event_loop(&mut engine, json).await;

    // Shutdown
    engine.shutdown().await;

    info!("quadlink exiting");
    result
}

/// Main event loop
async fn event_loop<N, P>(engine: &mut Engine<N, P>, json: bool) -> Result<()>
where
    N: NetworkStatus + Send + Sync + 'static,
    P: WirelessPermission + Send + Sync + 'static,
{
    loop {
        // Check for shutdown
        if engine.should_quit() {
            info!("Quit requested");
            break;
        }

        // Wait for next message
        match engine.msg_rx.recv().await {
            Some(msg) => {
                report_device_reply(&msg, json);

                let before = engine.state.status.clone();
                engine.process_message(msg);
                report_transition(&engine.state, &before, json);
            }
            None => {
                // Channel closed
                info!("Message channel closed");
                break;
            }
        }
    }

    Ok(())
}

/// Report a device reply before it is consumed by the update layer.
fn report_device_reply(msg: &Message, json: bool) {
    if let Message::DeviceReply { from, payload } = msg {
        if json {
            SessionEvent::device_reply(*from, payload).emit();
        } else {
            println!("{from} replied: {payload}");
        }
    }
}

/// Report a status transition, if one happened.
fn report_transition(state: &ConnState, before: &SessionStatus, json: bool) {
    let after = &state.status;
    if after == before {
        return;
    }

    if json {
        SessionEvent::status(after).emit();
        if let SessionStatus::Error(message) = after {
            error!("Session failed: {}", message);
            // The loop keeps running and the operator may redial, so no
            // failure reported here is fatal to the process.
            SessionEvent::error(message.clone(), false).emit();
        }
    } else {
        match after {
            SessionStatus::Error(message) => println!("status: {} ({message})", after.label()),
            _ => println!("status: {}", after.label()),
        }
    }

    if matches!(after, SessionStatus::Streaming) {
        let url = egress_url(state.config.pipeline.http_port);
        if json {
            SessionEvent::playback_ready(&url).emit();
        } else {
            println!("video ready at {url}");
        }
    }
}

/// Map an operator line to a message. `None` for unrecognized input.
fn parse_command(line: &str) -> Option<Message> {
    match line.trim() {
        "c" | "connect" => Some(Message::Connect),
        "d" | "disconnect" => Some(Message::Disconnect),
        "q" | "quit" => Some(Message::Quit),
        _ => None,
    }
}

/// Read operator commands from stdin and send them to the message channel
/// (blocking version, runs on a dedicated thread)
fn stdin_reader_blocking(msg_tx: mpsc::Sender<Message>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(msg) => {
                        info!("Stdin: {} requested", msg.kind());
                        let quit = matches!(msg, Message::Quit);
                        let _ = msg_tx.blocking_send(msg);
                        if quit {
                            break;
                        }
                    }
                    None => {
                        warn!("Unknown stdin command: {}", trimmed);
                    }
                }
            }
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    info!("Stdin reader exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_accepts_short_and_long_forms() {
        assert!(matches!(parse_command("c"), Some(Message::Connect)));
        assert!(matches!(parse_command("connect"), Some(Message::Connect)));
        assert!(matches!(parse_command("d"), Some(Message::Disconnect)));
        assert!(matches!(parse_command("disconnect"), Some(Message::Disconnect)));
        assert!(matches!(parse_command("q"), Some(Message::Quit)));
        assert!(matches!(parse_command("quit"), Some(Message::Quit)));
    }

    #[test]
    fn test_parse_command_trims_whitespace() {
        assert!(matches!(parse_command("  connect  "), Some(Message::Connect)));
    }

    #[test]
    fn test_parse_command_rejects_unknown() {
        assert!(parse_command("takeoff").is_none());
        assert!(parse_command("").is_none());
    }
}
