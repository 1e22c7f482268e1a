use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current connection state
    pub state: SessionState,

    /// Whether the current (or next) transport carries audio
    pub audio_enabled: bool,

    /// Session id of the live connection attempt, if any
    pub session_id: Option<String>,

    /// Failed connections since the last successful open
    pub attempts: u32,

    /// Transport connections opened (successful or not)
    pub connections_opened: u64,

    /// Outbound messages handed to the transport
    pub messages_sent: u64,

    /// Inbound messages processed while active
    pub messages_received: u64,

    /// Inbound messages dropped as undecodable
    pub messages_dropped: u64,

    /// Output pipelines created (initial plus reinitializations)
    pub playback_handles_opened: u64,

    /// Number of agent turns seen
    pub transcript_turns: usize,
}
