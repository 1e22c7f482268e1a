//! Transport seam between the session engine and the socket.
//!
//! A connection is a pair of bounded ports, so the session state machine can
//! be driven by an in-memory link as easily as by a real WebSocket.

pub mod websocket;

use anyhow::Result;
use tokio::sync::mpsc;

pub use websocket::WebSocketConnector;

/// WebSocket close code for a normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Outbound frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Inbound events, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// One open connection
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<TransportFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections. `connect` resolving means the transport is open.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportLink>;
}

/// Where the agent server lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host[:port]`, no scheme
    pub host: String,
    /// `wss` instead of `ws`
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// `ws[s]://<host>/ws/<session_id>?is_audio=<bool>`
    pub fn session_url(&self, session_id: &str, audio_enabled: bool) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{}://{}/ws/{}?is_audio={}",
            scheme,
            self.host.trim_end_matches('/'),
            session_id,
            audio_enabled
        )
    }
}

/// Fresh opaque token for one connection attempt.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
