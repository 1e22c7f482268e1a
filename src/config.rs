use anyhow::Result;
use serde::Deserialize;

use crate::audio::{AudioBackendConfig, CaptureConfig};
use crate::session::{ReconnectPolicy, SessionConfig};
use crate::transport::Endpoint;

/// Environment overrides look like `AGENT_STREAM__SERVER__HOST=example.com`
pub const ENV_PREFIX: &str = "AGENT_STREAM";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "agent-stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub secure: bool,
    /// Depth of the per-connection frame ports
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8000".to_string(),
            secure: false,
            queue_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub chunk_capacity: usize,
    pub frame_queue: usize,
    pub playback_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            chunk_capacity: crate::audio::DEFAULT_CHUNK_CAPACITY,
            frame_queue: 64,
            playback_queue: 64,
        }
    }
}

impl Config {
    /// Defaults, then the file at `path` (if present), then the environment.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: Endpoint::new(self.server.host.clone(), self.server.secure),
            reconnect: self.reconnect,
            capture: CaptureConfig {
                chunk_capacity: self.audio.chunk_capacity,
                sample_rate: self.audio.capture_sample_rate,
                ..CaptureConfig::default()
            },
            backend: AudioBackendConfig {
                target_sample_rate: self.audio.capture_sample_rate,
                target_channels: 1,
                frame_queue: self.audio.frame_queue,
            },
            ..SessionConfig::default()
        }
    }
}
