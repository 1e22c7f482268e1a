use serde::{Deserialize, Serialize};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_AUDIO_PCM: &str = "audio/pcm";
pub const MIME_IMAGE_JPEG: &str = "image/jpeg";
pub const MIME_IMAGE_GENERATED: &str = "image/generated";

/// One JSON object as it travels over the socket, in either direction.
///
/// Every field is optional on the wire: payload messages carry `mime_type` +
/// `data`, control messages carry `interrupted` / `turn_complete` (the server
/// may send `null` or `false` for the flag it is not raising).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>, // UTF-8 text or base64 binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

/// Which of the two image kinds an inbound image message carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Screenshot-style capture (`image/jpeg`)
    Jpeg,
    /// Agent-generated image (`image/generated`)
    Generated,
}

impl ImageKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => MIME_IMAGE_JPEG,
            ImageKind::Generated => MIME_IMAGE_GENERATED,
        }
    }
}

/// A decoded wire unit: exactly one payload or one control signal.
///
/// Binary payloads are held decoded; base64 only exists on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEnvelope {
    Text { data: String, partial: bool },
    Audio { pcm: Vec<u8> },
    Image {
        kind: ImageKind,
        data: Vec<u8>,
        filename: Option<String>,
    },
    Interrupted,
    TurnComplete,
}

impl MessageEnvelope {
    /// Outbound user text.
    pub fn text(data: impl Into<String>) -> Self {
        MessageEnvelope::Text {
            data: data.into(),
            partial: false,
        }
    }

    /// Outbound little-endian PCM16 audio.
    pub fn audio(pcm: Vec<u8>) -> Self {
        MessageEnvelope::Audio { pcm }
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageEnvelope::Interrupted | MessageEnvelope::TurnComplete
        )
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageEnvelope::Text { .. } => MIME_TEXT,
            MessageEnvelope::Audio { .. } => MIME_AUDIO_PCM,
            MessageEnvelope::Image { kind, .. } => kind.mime_type(),
            MessageEnvelope::Interrupted => "interrupted",
            MessageEnvelope::TurnComplete => "turn_complete",
        }
    }
}
