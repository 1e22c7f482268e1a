use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::channel::{OutputDevice, OutputHandle};
use crate::audio::convert::{bytes_to_pcm16, pcm16_to_f32, resample_linear};
use crate::audio::AudioError;

/// Default-output-device speaker via cpal.
///
/// Each handle runs its stream on its own thread, fed through a bounded port.
pub struct CpalSpeaker {
    /// Rate of the PCM16 the agent streams
    source_rate: u32,
    /// Bounded port depth, in chunks
    queue_depth: usize,
}

impl CpalSpeaker {
    pub fn new(source_rate: u32, queue_depth: usize) -> Self {
        Self {
            source_rate,
            queue_depth: queue_depth.max(1),
        }
    }
}

#[async_trait::async_trait]
impl OutputDevice for CpalSpeaker {
    async fn open(&self) -> Result<Box<dyn OutputHandle>> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, String>>();
        let (sample_tx, sample_rx) = std_mpsc::sync_channel::<Vec<f32>>(self.queue_depth);
        let (halt_tx, halt_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || match open_output_stream(sample_rx) {
                Ok((stream, device_rate)) => {
                    let _ = ready_tx.send(Ok(device_rate));
                    let _ = halt_rx.recv();
                    drop(stream);
                    debug!("Output stream dropped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                }
            })
            .context("Failed to spawn playback thread")?;

        let device_rate = match ready_rx.await {
            Ok(Ok(rate)) => rate,
            Ok(Err(reason)) => return Err(AudioError::OutputUnavailable(reason).into()),
            Err(_) => {
                return Err(
                    AudioError::OutputUnavailable("playback thread exited".to_string()).into(),
                )
            }
        };

        Ok(Box::new(CpalOutputHandle {
            sample_tx,
            halt_tx: Some(halt_tx),
            source_rate: self.source_rate,
            device_rate,
        }))
    }

    fn release(&self) {
        // The cpal host keeps no per-session context; streams die with their handles.
        debug!("Output device released");
    }

    fn name(&self) -> &str {
        "cpal-speaker"
    }
}

struct CpalOutputHandle {
    sample_tx: std_mpsc::SyncSender<Vec<f32>>,
    halt_tx: Option<std_mpsc::Sender<()>>,
    source_rate: u32,
    device_rate: u32,
}

impl OutputHandle for CpalOutputHandle {
    fn enqueue(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let samples: Vec<f32> = bytes_to_pcm16(pcm).into_iter().map(pcm16_to_f32).collect();
        let samples = resample_linear(&samples, self.source_rate, self.device_rate);

        match self.sample_tx.try_send(samples) {
            Ok(()) => Ok(()),
            Err(std_mpsc::TrySendError::Full(_)) => Err(AudioError::PlaybackFull),
            Err(std_mpsc::TrySendError::Disconnected(_)) => Err(AudioError::PlaybackClosed),
        }
    }

    fn halt(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for CpalOutputHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.halt_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn open_output_stream(sample_rx: std_mpsc::Receiver<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;

    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device
        .default_output_config()
        .context("Failed to query default output config")?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let device_rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, sample_rx)?,
        SampleFormat::I16 => build_output::<i16>(&device, &config, sample_rx)?,
        SampleFormat::U16 => build_output::<u16>(&device, &config, sample_rx)?,
        other => bail!("Unsupported output sample format: {:?}", other),
    };

    stream.play().context("Failed to start output stream")?;
    Ok((stream, device_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_rx: std_mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut queue: VecDeque<f32> = VecDeque::with_capacity(config.sample_rate.0 as usize);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(chunk) = sample_rx.try_recv() {
                queue.extend(chunk);
            }
            for frame in data.chunks_mut(channels) {
                let value = T::from_sample(queue.pop_front().unwrap_or(0.0));
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        },
        move |err| {
            warn!("Audio output stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}
