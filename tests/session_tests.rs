// Session state machine tests
//
// The connection is driven directly through `dispatch` against an in-memory
// connector, so every transition is deterministic.

mod common;

use agent_stream::playback::PlaybackChannel;
use agent_stream::protocol::{decode, MessageEnvelope};
use agent_stream::session::{
    ConnectionEvent, ReconnectPolicy, SessionConnection, SessionEvent, SessionState,
    STATUS_FAILED, STATUS_READY,
};
use agent_stream::transport::{Endpoint, TransportEvent, TransportFrame};
use common::{drain_events, fast_policy, MockConnector, RecordingOutput, ServerSide};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    connection: SessionConnection,
    connector: Arc<MockConnector>,
    output: Arc<RecordingOutput>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

fn harness(connector: Arc<MockConnector>, policy: ReconnectPolicy) -> Harness {
    let output = RecordingOutput::new();
    let (event_tx, events) = mpsc::unbounded_channel();
    let connection = SessionConnection::new(
        connector.clone(),
        Endpoint::new("localhost:8000", false),
        policy,
        PlaybackChannel::new(output.clone()),
        event_tx,
    );
    Harness {
        connection,
        connector,
        output,
        events,
    }
}

impl Harness {
    fn with_close_grace(mut self, grace: Duration) -> Self {
        self.connection = self.connection.with_close_grace(grace);
        self
    }

    /// Let the connection consume exactly one transport event or timer.
    async fn step(&mut self) {
        let event = tokio::time::timeout(common::WAIT, self.connection.next_event())
            .await
            .expect("timed out waiting for connection event");
        self.connection.dispatch(event).await;
    }

    async fn start(&mut self, audio_enabled: bool) -> ServerSide {
        self.connection
            .dispatch(ConnectionEvent::Start { audio_enabled })
            .await;
        assert_eq!(self.connection.state(), SessionState::Active);
        self.connector.take_server().expect("connection accepted")
    }
}

fn audio_json(pcm: &[u8]) -> serde_json::Value {
    use base64::Engine;
    json!({
        "mime_type": "audio/pcm",
        "data": base64::engine::general_purpose::STANDARD.encode(pcm),
    })
}

#[tokio::test]
async fn test_start_opens_session_url() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    let session_id = h.connection.session_id().unwrap().to_string();
    assert_eq!(
        server.url,
        format!("ws://localhost:8000/ws/{}?is_audio=false", session_id)
    );

    let events = drain_events(&mut h.events);
    assert!(events.contains(&SessionEvent::Connected {
        session_id,
        audio_enabled: false
    }));
    assert!(events.contains(&SessionEvent::StatusChanged {
        text: STATUS_READY.to_string()
    }));
}

#[tokio::test]
async fn test_start_is_ignored_while_active() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let _server = h.start(false).await;

    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: true,
        })
        .await;
    assert_eq!(h.connector.urls().len(), 1);
    assert!(!h.connection.audio_enabled());
}

#[tokio::test]
async fn test_send_only_while_active() {
    let mut h = harness(MockConnector::new(), fast_policy());
    assert!(!h.connection.send(MessageEnvelope::text("too early")).await);

    let mut server = h.start(false).await;
    assert!(h.connection.send(MessageEnvelope::text("Hello")).await);

    match server.next_frame().await {
        Some(TransportFrame::Text(text)) => {
            assert_eq!(decode(&text).unwrap(), MessageEnvelope::text("Hello"));
        }
        other => panic!("expected text frame, got {:?}", other),
    }
    assert_eq!(h.connection.stats().messages_sent, 1);
}

#[tokio::test]
async fn test_text_turn_is_replaced_then_finalized() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;
    drain_events(&mut h.events);

    server
        .send_json(json!({"mime_type": "text/plain", "data": "A", "partial": true}))
        .await;
    h.step().await;
    assert!(h.connection.agent_speaking());

    server
        .send_json(json!({"mime_type": "text/plain", "data": "A complete.", "partial": false}))
        .await;
    h.step().await;

    let chunks: Vec<SessionEvent> = drain_events(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::TextChunk { .. }))
        .collect();
    assert_eq!(
        chunks,
        vec![
            SessionEvent::TextChunk {
                content: "A".to_string(),
                is_final: false
            },
            SessionEvent::TextChunk {
                content: "A complete.".to_string(),
                is_final: true
            },
        ]
    );

    let turns = h.connection.transcript().turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].content, "A complete.");
    assert!(turns[0].completed_at.is_some());
}

#[tokio::test]
async fn test_turn_complete_finalizes_open_turn() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server
        .send_json(json!({"mime_type": "text/plain", "data": "Thinking", "partial": true}))
        .await;
    server.send_json(json!({"turn_complete": true})).await;
    h.step().await;
    h.step().await;

    assert!(!h.connection.agent_speaking());
    assert!(h.connection.transcript().turns()[0].is_final());
    let events = drain_events(&mut h.events);
    assert!(events.contains(&SessionEvent::TextChunk {
        content: "Thinking".to_string(),
        is_final: true
    }));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::StatusChanged {
            text: STATUS_READY.to_string()
        })
    );
}

#[tokio::test]
async fn test_interrupt_tears_down_playback_and_next_audio_recreates() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(true).await;

    server.send_json(audio_json(&[1, 0, 2, 0])).await;
    h.step().await;
    assert!(h.connection.agent_speaking());
    assert!(h.connection.playback().is_live());
    assert_eq!(h.output.log().opened, 1);

    server.send_json(json!({"interrupted": true})).await;
    h.step().await;
    assert!(!h.connection.agent_speaking());
    assert!(!h.connection.playback().is_live());
    assert_eq!(h.output.log().halted, 1);

    server.send_json(audio_json(&[3, 0])).await;
    h.step().await;
    let log = h.output.log();
    assert_eq!(log.opened, 2);
    assert_eq!(log.chunks, vec![(1, vec![1, 0, 2, 0]), (2, vec![3, 0])]);
}

#[tokio::test]
async fn test_audio_in_text_mode_is_discarded() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server.send_json(audio_json(&[1, 0, 2, 0])).await;
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Active);
    assert!(!h.connection.agent_speaking());
    assert!(!h.connection.playback().is_live());
    let log = h.output.log();
    assert_eq!(log.opened, 0);
    assert!(log.chunks.is_empty());
}

#[tokio::test]
async fn test_interrupt_without_playback_is_noop() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server.send_json(json!({"interrupted": true})).await;
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Active);
    assert_eq!(h.output.log().halted, 0);
}

#[tokio::test]
async fn test_images_are_surfaced() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server
        .send_json(json!({"mime_type": "image/jpeg", "data": "/9j/", "filename": "shot.jpg"}))
        .await;
    h.step().await;

    let events = drain_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ImageReceived { data, filename: Some(name), .. }
            if data == &vec![0xFF, 0xD8, 0xFF] && name == "shot.jpg"
    )));
}

#[tokio::test]
async fn test_malformed_message_keeps_session_alive() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server.send_raw("{not json").await;
    h.step().await;
    server
        .send_json(json!({"mime_type": "video/mp4", "data": "AAAA"}))
        .await;
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Active);
    let stats = h.connection.stats();
    assert_eq!(stats.messages_received, 2);
    assert_eq!(stats.messages_dropped, 2);
    assert_eq!(h.connector.urls().len(), 1);
}

#[tokio::test]
async fn test_mode_switch_closes_once_and_reopens() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let mut first = h.start(false).await;
    let first_id = h.connection.session_id().unwrap().to_string();

    h.connection
        .dispatch(ConnectionEvent::SwitchMode {
            audio_enabled: true,
        })
        .await;

    assert_eq!(h.connection.state(), SessionState::Active);
    assert!(h.connection.audio_enabled());

    // One close on the old link, then the link is gone.
    assert_eq!(
        first.next_frame().await,
        Some(TransportFrame::Close {
            code: 1000,
            reason: String::new()
        })
    );
    assert_eq!(first.next_frame().await, None);

    let second = h.connector.take_server().expect("second connection");
    let second_id = h.connection.session_id().unwrap().to_string();
    assert_ne!(first_id, second_id);
    assert_eq!(
        second.url,
        format!("ws://localhost:8000/ws/{}?is_audio=true", second_id)
    );
    assert_eq!(h.connector.urls().len(), 2);
    assert!(h.connector.take_server().is_none());
}

#[tokio::test]
async fn test_mode_switch_to_same_mode_is_noop() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let mut server = h.start(true).await;

    h.connection
        .dispatch(ConnectionEvent::SwitchMode {
            audio_enabled: true,
        })
        .await;

    assert_eq!(h.connector.urls().len(), 1);
    assert!(server.drain_frames().is_empty());
}

#[tokio::test]
async fn test_mode_switch_while_idle_only_records_flag() {
    let mut h = harness(MockConnector::new(), fast_policy());
    h.connection
        .dispatch(ConnectionEvent::SwitchMode {
            audio_enabled: true,
        })
        .await;

    assert_eq!(h.connection.state(), SessionState::Idle);
    assert!(h.connection.audio_enabled());
    assert!(h.connector.urls().is_empty());
}

#[tokio::test]
async fn test_stop_waits_for_close_ack() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let mut server = h.start(true).await;
    server.send_json(audio_json(&[1, 0])).await;
    h.step().await;

    h.connection.dispatch(ConnectionEvent::Stop).await;
    assert_eq!(h.connection.state(), SessionState::Closing);
    assert!(matches!(
        server.next_frame().await,
        Some(TransportFrame::Close { code: 1000, .. })
    ));

    server.ack_close().await;
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Idle);
    assert!(h.connection.session_id().is_none());
    assert!(!h.connection.playback().is_live());
    let log = h.output.log();
    assert_eq!(log.halted, 1);
    assert_eq!(log.released, 1);
    assert_eq!(h.connector.urls().len(), 1);
}

#[tokio::test]
async fn test_unacknowledged_stop_closes_after_grace() {
    let mut h = harness(MockConnector::new(), fast_policy())
        .with_close_grace(Duration::from_millis(20));
    let mut server = h.start(true).await;
    server.send_json(audio_json(&[1, 0])).await;
    h.step().await;

    h.connection.dispatch(ConnectionEvent::Stop).await;
    assert_eq!(h.connection.state(), SessionState::Closing);
    assert!(h.connection.close_pending());
    assert!(matches!(
        server.next_frame().await,
        Some(TransportFrame::Close { code: 1000, .. })
    ));

    // The server never answers; the grace timer ends the session.
    h.step().await;
    assert_eq!(h.connection.state(), SessionState::Idle);
    assert!(!h.connection.close_pending());
    assert!(h.connection.session_id().is_none());
    assert!(!h.connection.playback().is_live());
    assert_eq!(h.output.log().released, 1);
    assert!(drain_events(&mut h.events).contains(&SessionEvent::Disconnected {
        reason: "close not acknowledged".to_string()
    }));

    let _second = h.start(false).await;
    assert_eq!(h.connector.urls().len(), 2);
    assert!(h.connector.urls()[1].ends_with("?is_audio=false"));
}

#[tokio::test]
async fn test_server_close_triggers_backoff_and_reconnect() {
    let mut h = harness(MockConnector::new(), fast_policy());
    let server = h.start(false).await;

    server
        .to_client
        .send(TransportEvent::Closed {
            code: Some(1011),
            reason: "server error".to_string(),
        })
        .await
        .unwrap();
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Reconnecting);
    assert!(h.connection.retry_pending());
    assert_eq!(h.connection.attempts(), 1);
    assert!(!h.connection.send(MessageEnvelope::text("lost")).await);

    // Retry timer fires and the reconnect succeeds.
    h.step().await;
    assert_eq!(h.connection.state(), SessionState::Active);
    assert_eq!(h.connection.attempts(), 0);
    assert!(!h.connection.retry_pending());
    assert_eq!(h.connector.urls().len(), 2);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let mut h = harness(MockConnector::failing(), fast_policy());

    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: false,
        })
        .await;
    assert_eq!(h.connection.state(), SessionState::Reconnecting);

    while h.connection.state() == SessionState::Reconnecting {
        h.step().await;
    }

    assert_eq!(h.connection.state(), SessionState::Failed);
    assert_eq!(h.connector.urls().len(), 5);
    assert!(!h.connection.retry_pending());

    let events = drain_events(&mut h.events);
    assert!(events.contains(&SessionEvent::SessionFailed { attempts: 5 }));
    assert!(events.contains(&SessionEvent::StatusChanged {
        text: STATUS_FAILED.to_string()
    }));

    // No sixth attempt.
    let idle = tokio::time::timeout(Duration::from_millis(50), h.connection.next_event()).await;
    assert!(idle.is_err());
    assert_eq!(h.connector.urls().len(), 5);
}

#[tokio::test]
async fn test_restart_after_failure_resets_attempts() {
    let mut h = harness(MockConnector::failing(), fast_policy());
    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: false,
        })
        .await;
    while h.connection.state() == SessionState::Reconnecting {
        h.step().await;
    }
    assert_eq!(h.connection.state(), SessionState::Failed);

    h.connector.recover();
    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: true,
        })
        .await;
    assert_eq!(h.connection.state(), SessionState::Active);
    assert_eq!(h.connection.attempts(), 0);
    assert_eq!(h.connector.urls().len(), 6);
    assert!(h.connector.urls()[5].ends_with("?is_audio=true"));
}

#[tokio::test]
async fn test_transient_failures_recover_within_limit() {
    let mut h = harness(MockConnector::new(), fast_policy());
    h.connector.fail_next(2);
    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: false,
        })
        .await;
    assert_eq!(h.connection.attempts(), 1);

    h.step().await;
    assert_eq!(h.connection.attempts(), 2);
    h.step().await;

    assert_eq!(h.connection.state(), SessionState::Active);
    assert_eq!(h.connection.attempts(), 0);
    assert_eq!(h.connector.urls().len(), 3);
}

#[tokio::test]
async fn test_stop_during_backoff_cancels_retry() {
    let mut h = harness(
        MockConnector::failing(),
        ReconnectPolicy {
            base_delay_ms: 60_000,
            cap_delay_ms: 60_000,
            max_attempts: 5,
        },
    );
    h.connection
        .dispatch(ConnectionEvent::Start {
            audio_enabled: false,
        })
        .await;
    assert!(h.connection.retry_pending());

    h.connection.dispatch(ConnectionEvent::Stop).await;
    assert_eq!(h.connection.state(), SessionState::Idle);
    assert!(!h.connection.retry_pending());
    assert_eq!(h.connection.attempts(), 0);
}
