//! Structured session events for embedding hosts
//!
//! With `--json` the runner swaps its plain status lines for NDJSON on
//! stdout: one JSON object per line, each tagged with an `event` field and a
//! millisecond UTC timestamp, so a wrapping script can follow the session
//! without scraping human-oriented text.
//!
//! ```json
//! {"event":"status","status":"connecting","detail":null,"timestamp":1704700001000}
//! {"event":"status","status":"streaming","detail":null,"timestamp":1704700002000}
//! {"event":"playback_ready","url":"http://127.0.0.1:11112/","timestamp":1704700002000}
//! ```

use std::io::{self, Write};
use std::net::SocketAddr;

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use quadlink_core::types::SessionStatus;

/// Events emitted on stdout in JSON mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session status transition
    Status {
        status: String,
        /// Operator-facing failure message when the status is `error`
        detail: Option<String>,
        timestamp: i64,
    },

    /// The re-muxed stream is being consumed
    PlaybackReady { url: String, timestamp: i64 },

    /// Raw datagram received from the device
    DeviceReply {
        from: String,
        payload: String,
        timestamp: i64,
    },

    /// Session-level failure. `fatal` tells the host whether the process
    /// will keep running and accept another connect.
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl SessionEvent {
    /// Serialize and write this event as one stdout line.
    pub fn emit(&self) {
        let line = match serde_json::to_string(self) {
            Ok(line) => line,
            Err(e) => {
                error!("could not serialize session event: {e}");
                return;
            }
        };

        // Hold the lock across write and flush so the event lands as one
        // whole line and a pipe-attached host sees it immediately.
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
            error!("could not write session event: {e}");
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────

    pub fn status(status: &SessionStatus) -> Self {
        let detail = match status {
            SessionStatus::Error(message) => Some(message.clone()),
            _ => None,
        };
        Self::Status {
            status: status.label().to_string(),
            detail,
            timestamp: Self::now(),
        }
    }

    pub fn playback_ready(url: &str) -> Self {
        Self::PlaybackReady {
            url: url.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn device_reply(from: SocketAddr, payload: &str) -> Self {
        Self::DeviceReply {
            from: from.to_string(),
            payload: payload.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_value(event: &SessionEvent) -> serde_json::Value {
        let line = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&line).expect("emitted line is not valid JSON")
    }

    #[test]
    fn test_status_serialization() {
        let value = as_value(&SessionEvent::status(&SessionStatus::Connecting));
        assert_eq!(value["event"], "status");
        assert_eq!(value["status"], "connecting");
        assert!(value["detail"].is_null());
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_error_status_carries_detail() {
        let status = SessionStatus::Error("No network connection".to_string());
        let value = as_value(&SessionEvent::status(&status));
        assert_eq!(value["event"], "status");
        assert_eq!(value["status"], "error");
        assert_eq!(value["detail"], "No network connection");
    }

    #[test]
    fn test_playback_ready_serialization() {
        let value = as_value(&SessionEvent::playback_ready("http://127.0.0.1:11112/"));
        assert_eq!(value["event"], "playback_ready");
        assert_eq!(value["url"], "http://127.0.0.1:11112/");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_device_reply_serialization() {
        let from: SocketAddr = "192.168.10.1:8889".parse().unwrap();
        let value = as_value(&SessionEvent::device_reply(from, "ok"));
        assert_eq!(value["event"], "device_reply");
        assert_eq!(value["from"], "192.168.10.1:8889");
        assert_eq!(value["payload"], "ok");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_error_serialization() {
        let value = as_value(&SessionEvent::error(
            "Transcode pipeline failed: exit 1".to_string(),
            true,
        ));
        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Transcode pipeline failed: exit 1");
        assert_eq!(value["fatal"], true);
        assert!(value["timestamp"].is_number());
    }
}
