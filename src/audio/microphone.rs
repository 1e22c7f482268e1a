use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfig,
};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::downmix_to_mono;
use super::error::AudioError;

/// Microphone capture on the default input device.
///
/// The cpal stream lives on a dedicated thread for its whole lifetime; the
/// only traffic in and out is the frame port and a shutdown signal.
pub struct CpalMicrophone {
    config: AudioBackendConfig,
    shutdown_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.is_capturing() {
            bail!("Microphone already capturing");
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_queue.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || match open_input_stream(&config, frame_tx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Park until stop() signals or drops the sender.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    info!("Microphone released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                }
            })
            .context("Failed to spawn capture thread")?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.shutdown_tx = Some(shutdown_tx);
                self.thread = Some(thread);
                info!("Microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(reason)) => Err(AudioError::InputUnavailable(reason).into()),
            Err(_) => Err(AudioError::InputUnavailable("capture thread exited".to_string()).into()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if thread.join().is_err() {
                    error!("Capture thread panicked");
                }
            })
            .await
            .context("Failed to join capture thread")?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn open_input_stream(
    target: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = match matching_input_config(&device, target) {
        Some(supported) => supported,
        None => {
            debug!(
                "No input config for {} ch at {} Hz, using the device default",
                target.target_channels, target.target_sample_rate
            );
            device
                .default_input_config()
                .context("Failed to query default input config")?
        }
    };
    info!(
        "Input stream: {} ch at {} Hz ({:?})",
        supported.channels(),
        supported.sample_rate().0,
        supported.sample_format()
    );
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    let stream = match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, frame_tx)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, frame_tx)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, frame_tx)?,
        other => bail!("Unsupported input sample format: {:?}", other),
    };

    stream.play().context("Failed to start input stream")?;
    Ok(stream)
}

/// Pick a supported input config at the target rate, preferring the target
/// channel count. Stereo-only devices are downmixed in the callback.
fn matching_input_config(
    device: &cpal::Device,
    target: &AudioBackendConfig,
) -> Option<SupportedStreamConfig> {
    let rate = SampleRate(target.target_sample_rate);
    let usable: Vec<_> = device
        .supported_input_configs()
        .ok()?
        .filter(|range| {
            matches!(
                range.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .collect();

    usable
        .iter()
        .find(|range| range.channels() == target.target_channels)
        .or_else(|| usable.first())
        .map(|range| range.clone().with_sample_rate(rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let sample_rate = config.sample_rate.0;
    let started = Instant::now();
    let mut dropped: u64 = 0;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let raw: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
            let samples = downmix_to_mono(&raw, channels);

            let frame = AudioFrame {
                samples,
                sample_rate,
                channels: 1,
                timestamp_ms: started.elapsed().as_millis() as u64,
            };

            if let Err(mpsc::error::TrySendError::Full(_)) = frame_tx.try_send(frame) {
                dropped += 1;
                if dropped % 100 == 1 {
                    warn!("Capture port full, dropped {} frames so far", dropped);
                }
            }
        },
        move |err| {
            warn!("Audio input stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}
