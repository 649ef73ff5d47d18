//! # quadlink-drone - Device Link Management
//!
//! Owns everything that touches the drone or the host platform directly:
//! network-link preflight, the wireless permission gate, the UDP command
//! channel, and the external video transcode pipeline.
//!
//! Depends on [`quadlink_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Preflight
//! - [`preflight::check()`] - Verify the host is joined to the drone's network
//! - [`LinkReport`] / [`LinkKind`] - Snapshot of the active link
//! - [`NetworkStatus`] - Seam for injecting link snapshots in tests
//!
//! ### Permission
//! - [`WirelessPermission`] - Wireless access gate, re-checked every attempt
//! - [`SystemPermission`] - Production implementation
//!
//! ### Command Link
//! - [`CommandChannel`] - UDP channel for SDK commands and device replies
//!
//! ### Video Pipeline
//! - [`TranscodePipeline`] - Spawn and supervise the external transcoder
//! - [`transcode::build_args()`] - The fixed low-latency re-mux template

pub mod channel;
pub mod permission;
pub mod preflight;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transcode;

// Public API re-exports
pub use channel::CommandChannel;
pub use permission::{SystemPermission, WirelessPermission};
pub use preflight::{LinkKind, LinkReport, NetworkStatus, SystemNetworkStatus};
pub use transcode::{TranscodeId, TranscodePipeline};
