use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioFrame};
use super::chunk::CaptureBuffer;
use super::convert::resample_linear;
use crate::protocol::MessageEnvelope;

/// Capture pipeline settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per emitted chunk
    pub chunk_capacity: usize,
    /// Rate the chunks are sent at
    pub sample_rate: u32,
    /// Depth of the outbound chunk port
    pub chunk_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: super::chunk::DEFAULT_CHUNK_CAPACITY,
            sample_rate: 16000,
            chunk_queue: 32,
        }
    }
}

/// A running capture task: microphone frames in, `audio/pcm` envelopes out.
///
/// The task owns the backend and the buffer. The control side only sees the
/// outbound chunk port and can post a stop command.
pub struct CapturePipeline {
    chunks: mpsc::Receiver<MessageEnvelope>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl CapturePipeline {
    /// Acquire the microphone and start chunking.
    ///
    /// Fails without spawning anything when the device cannot be opened.
    pub async fn start(mut backend: Box<dyn AudioBackend>, config: CaptureConfig) -> Result<Self> {
        let frames = backend
            .start()
            .await
            .with_context(|| format!("Failed to start capture on {}", backend.name()))?;

        info!(
            "Capture pipeline started on {} ({} samples/chunk at {}Hz)",
            backend.name(),
            config.chunk_capacity,
            config.sample_rate
        );

        let (chunk_tx, chunks) = mpsc::channel(config.chunk_queue.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_capture(backend, frames, chunk_tx, stop_rx, config));

        Ok(Self {
            chunks,
            stop_tx: Some(stop_tx),
            task,
        })
    }

    /// Next outbound chunk, in the order samples were produced.
    ///
    /// Cancel-safe. Returns `None` once the task has finished.
    pub async fn next_chunk(&mut self) -> Option<MessageEnvelope> {
        self.chunks.recv().await
    }

    /// Stop capture and collect every chunk not yet handed out, including
    /// the final partial one.
    pub async fn stop(mut self) -> Vec<MessageEnvelope> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        let mut remaining = Vec::new();
        while let Some(envelope) = self.chunks.recv().await {
            remaining.push(envelope);
        }

        match self.task.await {
            Ok(total) => info!("Capture pipeline stopped after {} chunks", total),
            Err(e) => error!("Capture task panicked: {}", e),
        }

        remaining
    }
}

async fn run_capture(
    mut backend: Box<dyn AudioBackend>,
    mut frames: mpsc::Receiver<AudioFrame>,
    chunk_tx: mpsc::Sender<MessageEnvelope>,
    mut stop_rx: oneshot::Receiver<()>,
    config: CaptureConfig,
) -> u64 {
    let mut buffer = CaptureBuffer::new(config.chunk_capacity);

    'capture: loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                // Frames already posted by the device are part of the stream.
                while let Ok(frame) = frames.try_recv() {
                    if !push_frame(&mut buffer, &frame, &chunk_tx, config.sample_rate).await {
                        break 'capture;
                    }
                }
                break;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if !push_frame(&mut buffer, &frame, &chunk_tx, config.sample_rate).await {
                        break;
                    }
                }
                None => {
                    warn!("Capture device closed its frame port");
                    break;
                }
            },
        }
    }

    if let Some(last) = buffer.stop() {
        let _ = chunk_tx.send(last.into_envelope()).await;
    }

    if let Err(e) = backend.stop().await {
        error!("Failed to stop audio backend: {}", e);
    }

    buffer.chunks_emitted()
}

/// Returns false when the pipeline should wind down.
async fn push_frame(
    buffer: &mut CaptureBuffer,
    frame: &AudioFrame,
    chunk_tx: &mpsc::Sender<MessageEnvelope>,
    target_rate: u32,
) -> bool {
    let resampled;
    let samples = if frame.sample_rate != target_rate {
        resampled = resample_linear(&frame.samples, frame.sample_rate, target_rate);
        &resampled[..]
    } else {
        &frame.samples[..]
    };

    let chunks = match buffer.push(samples) {
        Ok(chunks) => chunks,
        Err(e) => {
            warn!("Dropping capture frame: {}", e);
            return false;
        }
    };

    for chunk in chunks {
        if chunk_tx.send(chunk.into_envelope()).await.is_err() {
            warn!("Chunk receiver gone, stopping capture");
            return false;
        }
    }
    true
}
