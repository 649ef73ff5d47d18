//! quadlink-app - Session orchestration for quadlink
//!
//! This crate implements the TEA (The Elm Architecture) pattern for session
//! state management, the Engine abstraction wiring the update function to
//! background tasks, configuration loading, the playback bridge, and the
//! headless runner loop.

pub mod actions;
pub mod config;
pub mod engine;
pub mod handler;
pub mod message;
pub mod playback;
pub mod report;
pub mod runner;
pub mod signals;
pub mod state;

// The types embedders actually touch
pub use config::Config;
pub use engine::Engine;
pub use handler::{UpdateAction, UpdateResult};
pub use message::Message;
pub use playback::PlaybackBridge;
pub use report::SessionEvent;
pub use state::{AttemptId, ConnState};
