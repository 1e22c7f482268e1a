pub mod audio;
pub mod config;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioError, AudioFrame, BackendFactory, CaptureBuffer,
    CaptureChunk, CaptureConfig, CapturePipeline, MicrophoneFactory,
};
pub use config::Config;
pub use playback::{CpalSpeaker, OutputDevice, OutputHandle, PlaybackChannel};
pub use protocol::{CodecError, ImageKind, MessageEnvelope, WireMessage};
pub use session::{
    ReconnectPolicy, SessionConfig, SessionController, SessionEvent, SessionHandle, SessionState,
    SessionStats, Transcript, TranscriptTurn,
};
pub use transport::{Connector, Endpoint, TransportEvent, TransportFrame, TransportLink, WebSocketConnector};
