//! Streaming session engine
//!
//! This module provides the pieces that sit between the user and the socket:
//! - The connection state machine with reconnect backoff and mode switches
//! - Inbound message handling (text turns, audio, images, barge-in)
//! - The controller that wires capture, playback and user intents together
//! - Session statistics

mod config;
mod connection;
mod controller;
mod events;
mod reconnect;
mod state;
mod stats;
mod transcript;

pub use config::SessionConfig;
pub use connection::{
    ConnectionEvent, SessionConnection, DEFAULT_CLOSE_GRACE, STATUS_CLOSING, STATUS_CONNECTING, STATUS_DISCONNECTED,
    STATUS_FAILED, STATUS_READY,
};
pub use controller::{SessionCommand, SessionController, SessionHandle};
pub use events::SessionEvent;
pub use reconnect::ReconnectPolicy;
pub use state::SessionState;
pub use stats::SessionStats;
pub use transcript::{Transcript, TranscriptTurn};
