use thiserror::Error;

/// Errors raised by the capture and playback pipelines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("capture buffer is closed")]
    CaptureClosed,

    #[error("audio input unavailable: {0}")]
    InputUnavailable(String),

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("playback handle is closed")]
    PlaybackClosed,

    #[error("playback queue is full")]
    PlaybackFull,
}
