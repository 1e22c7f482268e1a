use std::time::Duration;

use crate::audio::{AudioBackendConfig, CaptureConfig};
use crate::transport::Endpoint;

use super::connection::DEFAULT_CLOSE_GRACE;
use super::reconnect::ReconnectPolicy;

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Agent server to connect to
    pub endpoint: Endpoint,

    /// Backoff and give-up rules for transport failures
    pub reconnect: ReconnectPolicy,

    /// Chunking of outbound microphone audio
    pub capture: CaptureConfig,

    /// Microphone device settings
    pub backend: AudioBackendConfig,

    /// Depth of the user command port
    pub command_queue: usize,

    /// How long a stop waits for the server to acknowledge the close
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("localhost:8000", false),
            reconnect: ReconnectPolicy::default(),
            capture: CaptureConfig::default(),
            backend: AudioBackendConfig::default(),
            command_queue: 32,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}
