//! File-based logging setup
//!
//! The terminal belongs to the operator: status lines (or NDJSON events) go
//! to stdout, so tracing output goes to a daily-rotated file under the
//! per-user data directory instead. Set `QUADLINK_LOG` to override the
//! default filter (e.g. `QUADLINK_LOG=quadlink_drone=trace`).

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_ENV: &str = "QUADLINK_LOG";

/// Workspace crates at info, everything else at warn.
const DEFAULT_FILTER: &str =
    "warn,quadlink=info,quadlink_app=info,quadlink_drone=info,quadlink_core=info";

/// Initialize the logging subsystem.
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "quadlink.log");

    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let directives = filter.to_string();

    // UTC timestamps so log lines line up with the NDJSON event timestamps.
    let file_layer = fmt::layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()));

    tracing_subscriber::registry().with(filter).with(file_layer).init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("quadlink logging to {}", log_dir.display());
    tracing::info!("filter: {directives}");
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// `~/.local/share/quadlink/logs` (or the platform equivalent), current
/// directory as the fallback when no data directory exists.
fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quadlink")
        .join("logs")
}
