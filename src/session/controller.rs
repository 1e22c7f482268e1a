use anyhow::{anyhow, Context, Result};
use std::future::pending;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::config::SessionConfig;
use super::connection::{ConnectionEvent, SessionConnection};
use super::events::SessionEvent;
use super::state::SessionState;
use super::stats::SessionStats;
use crate::audio::{BackendFactory, CapturePipeline};
use crate::playback::{OutputDevice, PlaybackChannel};
use crate::protocol::MessageEnvelope;
use crate::transport::Connector;

/// User intents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start { audio_enabled: bool },
    Stop,
    SendText(String),
    SetAudio(bool),
    ToggleAudio,
    Shutdown,
}

/// Cloneable front door to a running `SessionController`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn start(&self, audio_enabled: bool) -> Result<()> {
        self.send(SessionCommand::Start { audio_enabled }).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SendText(text.into())).await
    }

    pub async fn set_audio(&self, enabled: bool) -> Result<()> {
        self.send(SessionCommand::SetAudio(enabled)).await
    }

    pub async fn toggle_audio(&self) -> Result<()> {
        self.send(SessionCommand::ToggleAudio).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Session controller has shut down"))
    }
}

/// Composition root: wires user intents to the connection, the capture
/// pipeline and playback, on a single control task.
pub struct SessionController {
    config: SessionConfig,
    connection: SessionConnection,
    backends: Arc<dyn BackendFactory>,
    capture: Option<CapturePipeline>,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        backends: Arc<dyn BackendFactory>,
        output: Arc<dyn OutputDevice>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, commands) = mpsc::channel(config.command_queue.max(1));
        let (events, event_rx) = mpsc::unbounded_channel();

        let connection = SessionConnection::new(
            connector,
            config.endpoint.clone(),
            config.reconnect,
            PlaybackChannel::new(output),
            events.clone(),
        )
        .with_close_grace(config.close_grace);

        let controller = Self {
            config,
            connection,
            backends,
            capture: None,
            commands,
            events,
        };

        (
            controller,
            SessionHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }

    pub fn connection(&self) -> &SessionConnection {
        &self.connection
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Run until `shutdown` or until every handle is dropped.
    pub async fn run(mut self) -> SessionStats {
        info!("Session controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.connection.next_event() => {
                    self.connection.dispatch(event).await;
                    self.after_transition().await;
                }
                chunk = next_capture_chunk(&mut self.capture) => match chunk {
                    Some(envelope) => {
                        self.connection.send(envelope).await;
                    }
                    None => {
                        warn!("Capture pipeline ended on its own");
                        self.stop_capture().await;
                    }
                },
            }
        }

        self.teardown().await;
        let stats = self.connection.stats();
        info!(
            "Session controller finished: {} sent, {} received, {} dropped, {} playback handles",
            stats.messages_sent,
            stats.messages_received,
            stats.messages_dropped,
            stats.playback_handles_opened
        );
        stats
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { audio_enabled } => self.start(audio_enabled).await,
            SessionCommand::Stop => {
                self.stop_capture().await;
                self.connection.dispatch(ConnectionEvent::Stop).await;
            }
            SessionCommand::SendText(text) => {
                if !self.connection.send(MessageEnvelope::text(text)).await {
                    warn!("Text not sent: session is {}", self.connection.state());
                }
            }
            SessionCommand::SetAudio(enabled) => self.set_audio(enabled).await,
            SessionCommand::ToggleAudio => {
                let enabled = !self.connection.audio_enabled();
                self.set_audio(enabled).await;
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn start(&mut self, audio_enabled: bool) {
        if !self.connection.state().can_start() {
            info!("Session already {}", self.connection.state());
            return;
        }

        if audio_enabled {
            if let Err(e) = self.acquire_audio().await {
                self.audio_error(e);
                return;
            }
        }

        self.connection
            .dispatch(ConnectionEvent::Start { audio_enabled })
            .await;
        self.after_transition().await;
    }

    async fn set_audio(&mut self, enabled: bool) {
        if enabled == self.connection.audio_enabled() {
            return;
        }

        let state = self.connection.state();
        if matches!(state, SessionState::Idle | SessionState::Failed | SessionState::Closing) {
            // Devices are acquired on the next start.
            self.connection
                .dispatch(ConnectionEvent::SwitchMode {
                    audio_enabled: enabled,
                })
                .await;
            return;
        }

        if enabled {
            if let Err(e) = self.acquire_audio().await {
                self.audio_error(e);
                return;
            }
        } else {
            self.stop_capture().await;
            self.connection.playback_mut().shutdown();
        }

        self.connection
            .dispatch(ConnectionEvent::SwitchMode {
                audio_enabled: enabled,
            })
            .await;
        self.after_transition().await;
    }

    /// Output first, then microphone. Whatever was acquired is released if
    /// either step fails.
    async fn acquire_audio(&mut self) -> Result<()> {
        self.stop_capture().await;

        self.connection
            .playback_mut()
            .ensure_ready()
            .await
            .context("Audio output unavailable")?;

        let pipeline = match self.backends.create(&self.config.backend) {
            Ok(backend) => CapturePipeline::start(backend, self.config.capture.clone()).await,
            Err(e) => Err(e),
        };

        match pipeline {
            Ok(pipeline) => {
                self.capture = Some(pipeline);
                Ok(())
            }
            Err(e) => {
                self.connection.playback_mut().shutdown();
                Err(e.context("Microphone unavailable"))
            }
        }
    }

    fn audio_error(&self, error: anyhow::Error) {
        warn!("Audio start aborted: {:#}", error);
        let _ = self.events.send(SessionEvent::AudioPermissionError {
            reason: format!("{:#}", error),
        });
    }

    /// Stop capture, sending the final chunks while the session can still
    /// take them.
    async fn stop_capture(&mut self) {
        if let Some(pipeline) = self.capture.take() {
            for envelope in pipeline.stop().await {
                self.connection.send(envelope).await;
            }
        }
    }

    async fn after_transition(&mut self) {
        if self.connection.state() == SessionState::Failed && self.capture.is_some() {
            info!("Session failed, releasing audio devices");
            self.stop_capture().await;
            self.connection.playback_mut().shutdown();
        }
    }

    async fn teardown(&mut self) {
        self.stop_capture().await;
        self.connection.dispatch(ConnectionEvent::Stop).await;

        // The connection's close timer bounds this wait.
        while self.connection.state() == SessionState::Closing {
            let event = self.connection.next_event().await;
            self.connection.dispatch(event).await;
        }

        self.connection.playback_mut().shutdown();
    }
}

async fn next_capture_chunk(capture: &mut Option<CapturePipeline>) -> Option<MessageEnvelope> {
    match capture {
        Some(pipeline) => pipeline.next_chunk().await,
        None => pending().await,
    }
}
