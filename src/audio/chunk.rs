use tracing::debug;

use super::convert::{f32_to_pcm16, pcm16_to_bytes};
use super::error::AudioError;
use crate::protocol::MessageEnvelope;

/// Default chunk capacity: 80ms at 16kHz.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1280;

/// One flushed run of quantized samples, ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureChunk {
    /// Emission order, starting at 0
    pub sequence: u64,
    /// PCM16 samples, never more than the buffer capacity
    pub samples: Vec<i16>,
}

impl CaptureChunk {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        pcm16_to_bytes(&self.samples)
    }

    /// Wrap as an outbound `audio/pcm` envelope.
    pub fn into_envelope(self) -> MessageEnvelope {
        MessageEnvelope::audio(self.to_pcm_bytes())
    }
}

/// Accumulates small capture frames into fixed-capacity chunks.
///
/// Concatenating every emitted chunk in order reproduces the pushed stream
/// (after PCM16 quantization), and no chunk exceeds `capacity` samples.
pub struct CaptureBuffer {
    capacity: usize,
    buffer: Vec<f32>,
    next_sequence: u64,
    closed: bool,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Vec::with_capacity(capacity),
            next_sequence: 0,
            closed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append one capture frame, returning any chunks that became ready.
    ///
    /// If the frame would overflow the buffer, what has accumulated is flushed
    /// first. A buffer that lands exactly on capacity is flushed immediately.
    /// Frames longer than the capacity are split across several chunks.
    pub fn push(&mut self, frame: &[f32]) -> Result<Vec<CaptureChunk>, AudioError> {
        if self.closed {
            return Err(AudioError::CaptureClosed);
        }

        let mut emitted = Vec::new();
        let mut rest = frame;

        while !rest.is_empty() {
            if self.buffer.len() + rest.len() > self.capacity {
                emitted.extend(self.flush());
            }

            let take = rest.len().min(self.capacity - self.buffer.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buffer.len() == self.capacity {
                emitted.extend(self.flush());
            }
        }

        Ok(emitted)
    }

    /// Emit whatever has accumulated. No-op on an empty buffer.
    pub fn flush(&mut self) -> Option<CaptureChunk> {
        if self.buffer.is_empty() {
            return None;
        }

        let samples: Vec<i16> = self.buffer.drain(..).map(f32_to_pcm16).collect();
        let chunk = CaptureChunk {
            sequence: self.next_sequence,
            samples,
        };
        self.next_sequence += 1;

        debug!(
            "Capture chunk {} flushed ({} samples)",
            chunk.sequence,
            chunk.len()
        );

        Some(chunk)
    }

    /// Flush the final partial chunk and refuse further pushes.
    pub fn stop(&mut self) -> Option<CaptureChunk> {
        let last = self.flush();
        self.closed = true;
        last
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_CAPACITY)
    }
}
