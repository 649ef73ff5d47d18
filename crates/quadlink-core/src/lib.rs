//! # quadlink-core - Core Domain Types
//!
//! Foundation crate for quadlink. Provides the session status vocabulary,
//! component event definitions, error handling, and the logging bootstrap.
//!
//! Sits at the bottom of the workspace: no internal dependencies, only
//! external crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Session Vocabulary (`types`)
//! - [`SessionStatus`] - Connection lifecycle status (Disconnected, Connecting,
//!   Connected, Streaming, Error)
//!
//! ### Component Events (`events`)
//! - [`LinkEvent`] - Inbound datagrams observed on the command channel
//! - [`PipelineEvent`] - Transcoder stderr lines and exit notifications
//! - [`TranscodeOutcome`] - Terminal outcome of one transcoder invocation
//! - [`PlaybackEvent`] - Readiness/failure reports from the playback surface
//!
//! ### Errors (`error`)
//! - [`Error`] - Error enum classified by originating subsystem
//! - [`ErrorCategory`] - Subsystem taxonomy (network, permission, transport,
//!   pipeline, playback)
//! - [`Result`] - Alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Adds `.context()` to any fallible expression
//!
//! ## Prelude
//!
//! The usual imports in one line:
//! ```rust
//! use quadlink_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Common imports for the rest of the workspace
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Crate-root re-exports so callers rarely need the module paths
pub use error::{Error, ErrorCategory, Result, ResultExt};
pub use events::{LinkEvent, PipelineEvent, PlaybackEvent, TranscodeOutcome};
pub use types::SessionStatus;
