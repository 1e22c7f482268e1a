// In-memory stand-ins for the socket, the speaker and the microphone.
//
// Every fake records what the session did to it so tests can assert on
// opens, closes, halts and the exact frames that went over the wire.

#![allow(dead_code)]

use agent_stream::audio::{AudioBackend, AudioBackendConfig, AudioError, AudioFrame, BackendFactory};
use agent_stream::playback::{OutputDevice, OutputHandle};
use agent_stream::session::{ReconnectPolicy, SessionEvent};
use agent_stream::transport::{Connector, TransportEvent, TransportFrame, TransportLink};
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

/// Backoff short enough that a full give-up cycle finishes in milliseconds
pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 1,
        cap_delay_ms: 10,
        max_attempts: 5,
    }
}

/// The server end of one in-memory connection
pub struct ServerSide {
    pub url: String,
    pub to_client: mpsc::Sender<TransportEvent>,
    pub from_client: mpsc::Receiver<TransportFrame>,
}

impl ServerSide {
    pub async fn send_json(&self, value: serde_json::Value) {
        self.to_client
            .send(TransportEvent::Message(value.to_string()))
            .await
            .expect("client inbound port closed");
    }

    pub async fn send_raw(&self, text: &str) {
        self.to_client
            .send(TransportEvent::Message(text.to_string()))
            .await
            .expect("client inbound port closed");
    }

    pub async fn ack_close(&self) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                code: Some(1000),
                reason: String::new(),
            })
            .await;
    }

    /// Next frame the client wrote, or `None` once the client dropped the link.
    pub async fn next_frame(&mut self) -> Option<TransportFrame> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
    }

    /// Everything the client has written so far, without waiting.
    pub fn drain_frames(&mut self) -> Vec<TransportFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Default)]
struct ConnectorState {
    urls: Vec<String>,
    fail_remaining: usize,
    fail_always: bool,
    servers: VecDeque<ServerSide>,
}

/// Connector backed by channel pairs; can be told to refuse connections.
#[derive(Default)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let connector = Self::default();
        connector.state.lock().unwrap().fail_always = true;
        Arc::new(connector)
    }

    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_remaining = count;
    }

    /// Accept connections again after `failing()`.
    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_always = false;
        state.fail_remaining = 0;
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn take_server(&self) -> Option<ServerSide> {
        self.state.lock().unwrap().servers.pop_front()
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&self) -> ServerSide {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(server) = self.take_server() {
                    return server;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for a connection")
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.to_string());

        if state.fail_always {
            bail!("connection refused");
        }
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            bail!("connection refused");
        }

        let (outbound, from_client) = mpsc::channel(64);
        let (to_client, inbound) = mpsc::channel(64);
        state.servers.push_back(ServerSide {
            url: url.to_string(),
            to_client,
            from_client,
        });

        Ok(TransportLink { outbound, inbound })
    }
}

/// What the session did to the output device
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    pub opened: usize,
    pub halted: usize,
    pub released: usize,
    /// (handle number, pcm bytes)
    pub chunks: Vec<(usize, Vec<u8>)>,
}

#[derive(Default)]
pub struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
    fail_opens: AtomicUsize,
    full_enqueues: Arc<AtomicUsize>,
}

impl RecordingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.fail_opens.store(count, Ordering::SeqCst);
    }

    /// Make live handles report a full queue for the next `count` chunks.
    pub fn fill_next_enqueues(&self, count: usize) {
        self.full_enqueues.store(count, Ordering::SeqCst);
    }

    pub fn log(&self) -> OutputLog {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl OutputDevice for RecordingOutput {
    async fn open(&self) -> Result<Box<dyn OutputHandle>> {
        if self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("output device busy");
        }

        let mut log = self.log.lock().unwrap();
        log.opened += 1;
        Ok(Box::new(RecordingHandle {
            id: log.opened,
            log: self.log.clone(),
            full_enqueues: self.full_enqueues.clone(),
        }))
    }

    fn release(&self) {
        self.log.lock().unwrap().released += 1;
    }

    fn name(&self) -> &str {
        "recording-output"
    }
}

struct RecordingHandle {
    id: usize,
    log: Arc<Mutex<OutputLog>>,
    full_enqueues: Arc<AtomicUsize>,
}

impl OutputHandle for RecordingHandle {
    fn enqueue(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if self
            .full_enqueues
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AudioError::PlaybackFull);
        }
        self.log.lock().unwrap().chunks.push((self.id, pcm.to_vec()));
        Ok(())
    }

    fn halt(self: Box<Self>) {
        self.log.lock().unwrap().halted += 1;
    }
}

/// Microphone that replays a fixed list of frames and then stays open.
pub struct ScriptedBackend {
    frames: Vec<Vec<f32>>,
    sample_rate: u32,
    sender: Option<mpsc::Sender<AudioFrame>>,
    stopped: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(self.frames.len().max(1));
        for (i, samples) in self.frames.iter().enumerate() {
            tx.try_send(AudioFrame {
                samples: samples.clone(),
                sample_rate: self.sample_rate,
                channels: 1,
                timestamp_ms: i as u64 * 8,
            })?;
        }
        self.sender = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.sender = None;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.sender.is_some()
    }

    fn name(&self) -> &str {
        "scripted-microphone"
    }
}

/// Hands out `ScriptedBackend`s, or refuses like a denied permission prompt.
pub struct ScriptedFactory {
    frames: Vec<Vec<f32>>,
    sample_rate: u32,
    deny: bool,
    pub created: AtomicUsize,
    pub stopped: Arc<AtomicBool>,
}

impl ScriptedFactory {
    pub fn new(frames: Vec<Vec<f32>>) -> Arc<Self> {
        Arc::new(Self {
            frames,
            sample_rate: 16000,
            deny: false,
            created: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            frames: Vec::new(),
            sample_rate: 16000,
            deny: true,
            created: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn scripted_backend(&self) -> Box<dyn AudioBackend> {
        Box::new(ScriptedBackend {
            frames: self.frames.clone(),
            sample_rate: self.sample_rate,
            sender: None,
            stopped: self.stopped.clone(),
        })
    }
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, _config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        if self.deny {
            bail!("microphone permission denied");
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.scripted_backend())
    }
}

/// `count` frames of `len` samples, with a ramp so ordering is visible
pub fn ramp_frames(count: usize, len: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|f| {
            (0..len)
                .map(|i| (((f * len + i) % 200) as f32 / 200.0) - 0.5)
                .collect()
        })
        .collect()
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Everything emitted so far, without waiting.
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
