use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle, owned by `SessionConnection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Reconnecting,
    Closing,
    Failed,
}

impl SessionState {
    /// States in which a transport close/error counts as a failure.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// States from which `start` is accepted.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closing => "closing",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
