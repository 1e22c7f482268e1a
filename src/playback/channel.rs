use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::AudioError;

/// An output device that can hand out live playback handles.
#[async_trait::async_trait]
pub trait OutputDevice: Send + Sync {
    /// Build a new output pipeline and wait until it can accept audio.
    async fn open(&self) -> Result<Box<dyn OutputHandle>>;

    /// Release the underlying device/context. Called on session end.
    fn release(&self);

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// One live output pipeline.
pub trait OutputHandle: Send {
    /// Queue little-endian PCM16 for playback. Must not block.
    ///
    /// `PlaybackFull` drops this chunk only; any other error means the
    /// handle is dead.
    fn enqueue(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Hard stop: discard anything buffered and tear the pipeline down.
    fn halt(self: Box<Self>);
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub handles_opened: u64,
    pub chunks_delivered: u64,
    pub chunks_dropped: u64,
}

/// Owns the (at most one) live output handle and its interruption contract.
pub struct PlaybackChannel {
    device: Arc<dyn OutputDevice>,
    handle: Option<Box<dyn OutputHandle>>,
    stats: PlaybackStats,
}

impl PlaybackChannel {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        Self {
            device,
            handle: None,
            stats: PlaybackStats::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    /// Return the live handle, building one first if there is none.
    pub async fn ensure_ready(&mut self) -> Result<&mut Box<dyn OutputHandle>> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                let handle = self
                    .device
                    .open()
                    .await
                    .with_context(|| format!("Failed to open output on {}", self.device.name()))?;
                self.stats.handles_opened += 1;
                info!(
                    "Playback handle #{} ready on {}",
                    self.stats.handles_opened,
                    self.device.name()
                );
                handle
            }
        };
        Ok(self.handle.insert(handle))
    }

    /// Hand one decoded PCM chunk to the output pipeline.
    ///
    /// Reinitializes the handle if an interruption tore it down. If that
    /// fails, this chunk is dropped and the next one retries.
    pub async fn deliver(&mut self, pcm: &[u8]) -> bool {
        if self.handle.is_none() {
            debug!("No live playback handle, reinitializing");
            if let Err(e) = self.ensure_ready().await {
                warn!("Dropping audio chunk: {:#}", e);
                self.stats.chunks_dropped += 1;
                return false;
            }
        }

        let Some(handle) = self.handle.as_mut() else {
            self.stats.chunks_dropped += 1;
            return false;
        };

        match handle.enqueue(pcm) {
            Ok(()) => {
                self.stats.chunks_delivered += 1;
                true
            }
            Err(AudioError::PlaybackFull) => {
                warn!("Playback queue full, dropping chunk");
                self.stats.chunks_dropped += 1;
                false
            }
            Err(e) => {
                warn!("Playback handle rejected chunk ({}), tearing it down", e);
                self.stats.chunks_dropped += 1;
                self.interrupt();
                false
            }
        }
    }

    /// Tear down the live handle immediately. No-op when nothing is live.
    pub fn interrupt(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.halt();
            info!("Playback handle torn down");
        }
    }

    /// Interrupt and release the output device.
    pub fn shutdown(&mut self) {
        self.interrupt();
        self.device.release();
    }
}

impl Drop for PlaybackChannel {
    fn drop(&mut self) {
        self.interrupt();
    }
}
