use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, warn};

use super::events::SessionEvent;
use super::reconnect::ReconnectPolicy;
use super::state::SessionState;
use super::stats::SessionStats;
use super::transcript::Transcript;
use crate::playback::PlaybackChannel;
use crate::protocol::{self, MessageEnvelope};
use crate::transport::{
    generate_session_id, Connector, Endpoint, TransportEvent, TransportFrame, TransportLink,
    NORMAL_CLOSURE,
};

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_READY: &str = "Connected - Ready to chat";
pub const STATUS_CLOSING: &str = "Disconnecting...";
pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_FAILED: &str = "Connection failed. Please restart the session.";

/// How long a user stop waits for the server to acknowledge the close
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Inputs to the connection state machine.
#[derive(Debug)]
pub enum ConnectionEvent {
    Start { audio_enabled: bool },
    Stop,
    SwitchMode { audio_enabled: bool },
    Transport(TransportEvent),
    RetryTimerFired,
    CloseGraceElapsed,
}

/// What the single pending timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Retry,
    CloseGrace,
}

/// Owns the transport and drives the session state machine.
///
/// Everything here runs on one control task: `dispatch` is the only entry
/// point that changes state, and it suspends only while opening a transport
/// or building an output pipeline.
pub struct SessionConnection {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    state: SessionState,
    audio_enabled: bool,
    session_id: Option<String>,
    attempts: u32,
    link: Option<TransportLink>,
    timer: Option<(TimerKind, Pin<Box<Sleep>>)>,
    close_grace: Duration,
    agent_speaking: bool,
    transcript: Transcript,
    playback: PlaybackChannel,
    events: mpsc::UnboundedSender<SessionEvent>,
    connections_opened: u64,
    messages_sent: u64,
    messages_received: u64,
    messages_dropped: u64,
}

impl SessionConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        playback: PlaybackChannel,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            policy,
            state: SessionState::Idle,
            audio_enabled: false,
            session_id: None,
            attempts: 0,
            link: None,
            timer: None,
            close_grace: DEFAULT_CLOSE_GRACE,
            agent_speaking: false,
            transcript: Transcript::new(),
            playback,
            events,
            connections_opened: 0,
            messages_sent: 0,
            messages_received: 0,
            messages_dropped: 0,
        }
    }

    pub fn with_close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn playback(&self) -> &PlaybackChannel {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackChannel {
        &mut self.playback
    }

    pub fn retry_pending(&self) -> bool {
        matches!(self.timer, Some((TimerKind::Retry, _)))
    }

    pub fn close_pending(&self) -> bool {
        matches!(self.timer, Some((TimerKind::CloseGrace, _)))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            audio_enabled: self.audio_enabled,
            session_id: self.session_id.clone(),
            attempts: self.attempts,
            connections_opened: self.connections_opened,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            messages_dropped: self.messages_dropped,
            playback_handles_opened: self.playback.stats().handles_opened,
            transcript_turns: self.transcript.turns().len(),
        }
    }

    /// Wait for the next transport event or timer.
    ///
    /// Cancel-safe; pends forever when there is neither a link nor a timer.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        let link = self.link.as_mut();
        let timer = self.timer.as_mut();

        tokio::select! {
            event = async {
                match link {
                    Some(link) => link.inbound.recv().await,
                    None => pending().await,
                }
            } => match event {
                Some(event) => ConnectionEvent::Transport(event),
                None => ConnectionEvent::Transport(TransportEvent::Closed {
                    code: None,
                    reason: "transport dropped".to_string(),
                }),
            },
            kind = async {
                match timer {
                    Some((kind, delay)) => {
                        delay.as_mut().await;
                        *kind
                    }
                    None => pending().await,
                }
            } => match kind {
                TimerKind::Retry => ConnectionEvent::RetryTimerFired,
                TimerKind::CloseGrace => ConnectionEvent::CloseGraceElapsed,
            },
        }
    }

    /// Single entry point for every state transition.
    pub async fn dispatch(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Start { audio_enabled } => self.start(audio_enabled).await,
            ConnectionEvent::Stop => self.stop(),
            ConnectionEvent::SwitchMode { audio_enabled } => self.switch_mode(audio_enabled).await,
            ConnectionEvent::Transport(event) => self.on_transport(event).await,
            ConnectionEvent::RetryTimerFired => self.on_retry_timer().await,
            ConnectionEvent::CloseGraceElapsed => self.on_close_grace(),
        }
    }

    /// Send one envelope. Only valid while active; nothing is queued across
    /// reconnects.
    pub async fn send(&mut self, envelope: MessageEnvelope) -> bool {
        if self.state != SessionState::Active {
            debug!(
                "Dropping outbound {} while session is {}",
                envelope.kind(),
                self.state
            );
            return false;
        }

        let text = match protocol::encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode outbound {}: {}", envelope.kind(), e);
                return false;
            }
        };

        let Some(link) = self.link.as_ref() else {
            return false;
        };

        if link.outbound.send(TransportFrame::Text(text)).await.is_err() {
            warn!("Transport writer gone, dropping outbound {}", envelope.kind());
            return false;
        }

        self.messages_sent += 1;
        true
    }

    async fn start(&mut self, audio_enabled: bool) {
        if !self.state.can_start() {
            debug!("Ignoring start while session is {}", self.state);
            return;
        }
        self.audio_enabled = audio_enabled;
        self.attempts = 0;
        self.open().await;
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Closing => {}
            SessionState::Active => {
                self.set_state(SessionState::Closing);
                self.status(STATUS_CLOSING);
                if self.send_close() {
                    self.set_timer(TimerKind::CloseGrace, self.close_grace);
                } else {
                    self.finish_close("closed by user");
                }
            }
            SessionState::Connecting | SessionState::Reconnecting | SessionState::Failed => {
                self.finish_close("closed by user");
            }
        }
    }

    async fn switch_mode(&mut self, audio_enabled: bool) {
        if audio_enabled == self.audio_enabled {
            return;
        }

        if self.state != SessionState::Active {
            info!(
                "Audio mode set to {} (applies to the next connection)",
                audio_enabled
            );
            self.audio_enabled = audio_enabled;
            return;
        }

        // The audio flag is fixed per transport, so a switch is a full reconnect.
        info!("Switching audio mode to {}", audio_enabled);
        self.set_state(SessionState::Closing);
        self.send_close();
        self.link = None;
        self.set_speaking(false);
        self.emit(SessionEvent::Disconnected {
            reason: "switching audio mode".to_string(),
        });

        self.audio_enabled = audio_enabled;
        self.attempts = 0;
        self.open().await;
    }

    async fn open(&mut self) {
        let session_id = generate_session_id();
        let url = self.endpoint.session_url(&session_id, self.audio_enabled);

        self.set_state(SessionState::Connecting);
        self.status(STATUS_CONNECTING);
        self.session_id = Some(session_id.clone());
        self.connections_opened += 1;

        match self.connector.connect(&url).await {
            Ok(link) => self.on_open(link, session_id),
            Err(e) => {
                warn!("Connection attempt failed: {:#}", e);
                self.on_failure(format!("{:#}", e));
            }
        }
    }

    fn on_open(&mut self, link: TransportLink, session_id: String) {
        self.link = Some(link);
        self.timer = None;
        self.attempts = 0;
        // A new connection always starts a fresh turn.
        self.transcript.break_turn();
        self.set_state(SessionState::Active);

        info!(
            "Session {} active (audio: {})",
            session_id, self.audio_enabled
        );
        self.emit(SessionEvent::Connected {
            session_id,
            audio_enabled: self.audio_enabled,
        });
        self.status(STATUS_READY);
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => {
                if self.state == SessionState::Active {
                    self.on_message(&text).await;
                } else {
                    debug!("Ignoring inbound message while session is {}", self.state);
                }
            }
            TransportEvent::Closed { code, reason } => {
                let reason = match code {
                    Some(code) => format!("closed ({}) {}", code, reason).trim_end().to_string(),
                    None => format!("closed: {}", reason),
                };
                self.on_link_down(reason);
            }
            TransportEvent::Error(reason) => {
                error!("Transport error: {}", reason);
                self.on_link_down(format!("error: {}", reason));
            }
        }
    }

    fn on_link_down(&mut self, reason: String) {
        match self.state {
            SessionState::Closing => {
                info!("Transport close acknowledged");
                self.finish_close("closed by user");
            }
            state if state.is_live() => self.on_failure(reason),
            state => debug!("Ignoring transport close while session is {}", state),
        }
    }

    fn on_failure(&mut self, reason: String) {
        self.link = None;
        self.set_speaking(false);
        self.emit(SessionEvent::Disconnected {
            reason: reason.clone(),
        });

        let attempt = self.attempts;
        self.attempts += 1;

        if self.policy.should_give_up(self.attempts) {
            error!(
                "Giving up after {} failed connection attempts ({})",
                self.attempts, reason
            );
            self.timer = None;
            self.session_id = None;
            self.set_state(SessionState::Failed);
            self.status(STATUS_FAILED);
            self.emit(SessionEvent::SessionFailed {
                attempts: self.attempts,
            });
            return;
        }

        let delay = self.policy.next_delay(attempt);
        info!(
            "Reconnect attempt {} scheduled in {:?}",
            self.attempts, delay
        );
        self.set_timer(TimerKind::Retry, delay);
        self.set_state(SessionState::Reconnecting);
        self.status(&format!(
            "Connection lost. Reconnecting in {}s...",
            delay.as_millis() as f64 / 1000.0
        ));
    }

    /// Arm the one pending timer, cancelling whatever it was armed for.
    fn set_timer(&mut self, kind: TimerKind, delay: Duration) {
        if let Some((previous, _)) = &self.timer {
            debug!("Replacing pending {:?} timer with {:?}", previous, kind);
        }
        self.timer = Some((kind, Box::pin(sleep(delay))));
    }

    async fn on_retry_timer(&mut self) {
        self.timer = None;
        if self.state != SessionState::Reconnecting {
            debug!("Stale reconnect timer in state {}", self.state);
            return;
        }
        self.open().await;
    }

    fn on_close_grace(&mut self) {
        self.timer = None;
        if self.state != SessionState::Closing {
            debug!("Stale close timer in state {}", self.state);
            return;
        }
        warn!(
            "Server did not acknowledge close in {:?}, closing locally",
            self.close_grace
        );
        self.finish_close("close not acknowledged");
    }

    async fn on_message(&mut self, text: &str) {
        self.messages_received += 1;

        let envelope = match protocol::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping inbound message: {}", e);
                self.messages_dropped += 1;
                return;
            }
        };

        match envelope {
            MessageEnvelope::Interrupted => {
                info!("Agent output interrupted");
                self.set_speaking(false);
                self.playback.interrupt();
                self.transcript.break_turn();
            }
            MessageEnvelope::TurnComplete => {
                self.set_speaking(false);
                if let Some(turn) = self.transcript.finalize_current() {
                    let content = turn.content.clone();
                    self.emit(SessionEvent::TextChunk {
                        content,
                        is_final: true,
                    });
                }
                self.status(STATUS_READY);
            }
            MessageEnvelope::Text { data, partial } => {
                self.set_speaking(true);
                let turn = self.transcript.apply_fragment(&data, partial);
                let event = SessionEvent::TextChunk {
                    content: turn.content.clone(),
                    is_final: turn.is_final(),
                };
                self.emit(event);
            }
            MessageEnvelope::Audio { pcm } if !self.audio_enabled => {
                debug!("Discarding {} bytes of agent audio in text mode", pcm.len());
            }
            MessageEnvelope::Audio { pcm } => {
                self.set_speaking(true);
                self.playback.deliver(&pcm).await;
            }
            MessageEnvelope::Image {
                kind,
                data,
                filename,
            } => {
                info!(
                    "Image received ({}, {} bytes{})",
                    kind.mime_type(),
                    data.len(),
                    filename
                        .as_deref()
                        .map(|f| format!(", {}", f))
                        .unwrap_or_default()
                );
                self.emit(SessionEvent::ImageReceived {
                    kind,
                    data,
                    filename,
                });
            }
        }
    }

    /// Post a normal-closure frame. Returns false if the link is already gone.
    fn send_close(&mut self) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        link.outbound
            .try_send(TransportFrame::Close {
                code: NORMAL_CLOSURE,
                reason: String::new(),
            })
            .is_ok()
    }

    fn finish_close(&mut self, reason: &str) {
        self.link = None;
        self.timer = None;
        self.session_id = None;
        self.attempts = 0;
        self.set_speaking(false);
        self.transcript.break_turn();
        self.playback.shutdown();
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        self.status(STATUS_DISCONNECTED);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!("Session state: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.agent_speaking != speaking {
            self.agent_speaking = speaking;
            self.emit(SessionEvent::AgentSpeakingChanged { speaking });
        }
    }

    fn status(&self, text: &str) {
        self.emit(SessionEvent::StatusChanged {
            text: text.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
