use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{Connector, TransportEvent, TransportFrame, TransportLink};

/// WebSocket transport on tokio-tungstenite.
///
/// Each connection gets a writer task (outbound port -> socket) and a reader
/// task (socket -> inbound port).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    queue_depth: usize,
}

impl WebSocketConnector {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        info!("WebSocket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<TransportFrame>(self.queue_depth);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(self.queue_depth);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    TransportFrame::Text(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            error!("Failed to send WebSocket frame: {}", e);
                            break;
                        }
                    }
                    TransportFrame::Close { code, reason } => {
                        let close = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = ws_tx.send(Message::Close(Some(close))).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        break;
                    }
                }
            }
            let _ = ws_tx.close().await;
            debug!("WebSocket writer finished");
        });

        tokio::spawn(async move {
            let last = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(TransportEvent::Message(text)).await.is_err() {
                            // Session dropped this link.
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, String::new()),
                        };
                        info!("WebSocket closed by server: {:?} {}", code, reason);
                        break TransportEvent::Closed { code, reason };
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Ignoring {} byte binary frame", data.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Error reading from WebSocket: {}", e);
                        break TransportEvent::Error(e.to_string());
                    }
                    None => {
                        break TransportEvent::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        };
                    }
                }
            };
            let _ = inbound_tx.send(last).await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
