use anyhow::Result;
use tokio::sync::mpsc;

use super::microphone::CpalMicrophone;

/// Audio sample data as delivered by a capture device (mono f32 in [-1.0, 1.0])
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (backends downmix to 1)
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (frames at other rates are resampled downstream)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Depth of the bounded port between the device thread and the pipeline
    pub frame_queue: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz upstream
            target_channels: 1,        // Mono
            frame_queue: 64,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations own the input device handle. Frames are posted from the
/// device's own thread; nothing on that thread touches session state.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Fails when
    /// the microphone cannot be acquired.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Builds a fresh capture backend for every voice-mode start.
pub trait BackendFactory: Send + Sync {
    fn create(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}

/// Default-input-device microphone via cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrophoneFactory;

impl BackendFactory for MicrophoneFactory {
    fn create(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        Ok(Box::new(CpalMicrophone::new(config.clone())))
    }
}
