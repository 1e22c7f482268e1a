use crate::protocol::ImageKind;

/// Everything the session engine tells its UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport opened and the session is active
    Connected {
        session_id: String,
        audio_enabled: bool,
    },
    /// Transport went away (user close, server close or error)
    Disconnected { reason: String },
    /// Human-readable progress text
    StatusChanged { text: String },
    AgentSpeakingChanged { speaking: bool },
    /// The current turn's whole-so-far content
    TextChunk { content: String, is_final: bool },
    ImageReceived {
        kind: ImageKind,
        data: Vec<u8>,
        filename: Option<String>,
    },
    /// Microphone or speaker could not be acquired; the start was aborted
    AudioPermissionError { reason: String },
    /// Reconnect attempts exhausted; needs an explicit restart
    SessionFailed { attempts: u32 },
}
