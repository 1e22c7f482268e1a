pub mod backend;
pub mod capture;
pub mod chunk;
pub mod convert;
pub mod error;
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, BackendFactory, MicrophoneFactory};
pub use capture::{CaptureConfig, CapturePipeline};
pub use chunk::{CaptureBuffer, CaptureChunk, DEFAULT_CHUNK_CAPACITY};
pub use error::AudioError;
pub use microphone::CpalMicrophone;
