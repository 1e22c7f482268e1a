use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use super::messages::{
    ImageKind, MessageEnvelope, WireMessage, MIME_AUDIO_PCM, MIME_IMAGE_GENERATED,
    MIME_IMAGE_JPEG, MIME_TEXT,
};

/// Per-message decode failures. None of these should tear down a connection.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    #[error("invalid {mime_type} payload: {reason}")]
    InvalidPayload {
        mime_type: &'static str,
        reason: String,
    },

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize an envelope into one text frame.
pub fn encode(envelope: &MessageEnvelope) -> Result<String, CodecError> {
    let wire = to_wire(envelope);
    Ok(serde_json::to_string(&wire)?)
}

/// Parse one text frame into an envelope.
pub fn decode(text: &str) -> Result<MessageEnvelope, CodecError> {
    let wire: WireMessage = serde_json::from_str(text)
        .map_err(|e| CodecError::MalformedMessage(e.to_string()))?;
    from_wire(wire)
}

pub fn to_wire(envelope: &MessageEnvelope) -> WireMessage {
    match envelope {
        MessageEnvelope::Text { data, partial } => WireMessage {
            mime_type: Some(MIME_TEXT.to_string()),
            data: Some(data.clone()),
            partial: partial.then_some(true),
            ..Default::default()
        },
        MessageEnvelope::Audio { pcm } => WireMessage {
            mime_type: Some(MIME_AUDIO_PCM.to_string()),
            data: Some(BASE64.encode(pcm)),
            ..Default::default()
        },
        MessageEnvelope::Image {
            kind,
            data,
            filename,
        } => WireMessage {
            mime_type: Some(kind.mime_type().to_string()),
            data: Some(BASE64.encode(data)),
            filename: filename.clone(),
            ..Default::default()
        },
        MessageEnvelope::Interrupted => WireMessage {
            interrupted: Some(true),
            ..Default::default()
        },
        MessageEnvelope::TurnComplete => WireMessage {
            turn_complete: Some(true),
            ..Default::default()
        },
    }
}

pub fn from_wire(wire: WireMessage) -> Result<MessageEnvelope, CodecError> {
    // Interruption wins when the server raises both flags in one message.
    if wire.interrupted == Some(true) {
        return Ok(MessageEnvelope::Interrupted);
    }
    if wire.turn_complete == Some(true) {
        return Ok(MessageEnvelope::TurnComplete);
    }

    let mime_type = wire
        .mime_type
        .ok_or_else(|| CodecError::MalformedMessage("missing mime_type".to_string()))?;
    let data = wire
        .data
        .ok_or_else(|| CodecError::MalformedMessage(format!("{} without data", mime_type)))?;

    match mime_type.as_str() {
        MIME_TEXT => Ok(MessageEnvelope::Text {
            data,
            partial: wire.partial.unwrap_or(false),
        }),
        MIME_AUDIO_PCM => Ok(MessageEnvelope::Audio {
            pcm: decode_base64(MIME_AUDIO_PCM, &data)?,
        }),
        MIME_IMAGE_JPEG => Ok(MessageEnvelope::Image {
            kind: ImageKind::Jpeg,
            data: decode_base64(MIME_IMAGE_JPEG, &data)?,
            filename: wire.filename,
        }),
        MIME_IMAGE_GENERATED => Ok(MessageEnvelope::Image {
            kind: ImageKind::Generated,
            data: decode_base64(MIME_IMAGE_GENERATED, &data)?,
            filename: wire.filename,
        }),
        other => Err(CodecError::UnsupportedMimeType(other.to_string())),
    }
}

fn decode_base64(mime_type: &'static str, data: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(data)
        .map_err(|e| CodecError::InvalidPayload {
            mime_type,
            reason: e.to_string(),
        })
}
