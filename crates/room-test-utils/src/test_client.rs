//! Scripted broker connection.
//!
//! Drives the broker in-process, the way the WebSocket read loop does, and
//! exposes the connection's outbox for assertions.

use room_service::broker::{ConnectionId, SignalingBroker};
use signaling_protocol::events::{
    JoinRoom, JoinWaitingRoom, Password, RoomRef, SendChat, WaitingDecision,
};
use signaling_protocol::{ClientEvent, ErrorCode, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// How long `expect` waits for an event.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One broker connection.
pub struct TestClient {
    broker: Arc<SignalingBroker>,
    conn: ConnectionId,
    outbox: UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    pub fn connect(broker: Arc<SignalingBroker>) -> Self {
        let (conn, outbox) = broker.connect();
        Self {
            broker,
            conn,
            outbox,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.conn
    }

    /// Send one event and wait for the broker to finish handling it.
    pub async fn send(&self, event: ClientEvent) {
        self.broker.handle(&self.conn, event).await;
    }

    /// Send a raw text frame.
    pub async fn send_text(&self, text: &str) {
        self.broker.handle_text(&self.conn, text).await;
    }

    pub async fn join(&self, room_code: &str, user_id: &str, display_name: &str) {
        self.send(ClientEvent::JoinRoom(JoinRoom {
            room_code: room_code.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            password: None,
            audio_enabled: None,
            video_enabled: None,
        }))
        .await;
    }

    pub async fn join_with_password(
        &self,
        room_code: &str,
        user_id: &str,
        display_name: &str,
        password: &str,
    ) {
        self.send(ClientEvent::JoinRoom(JoinRoom {
            room_code: room_code.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            password: Some(Password::new(password)),
            audio_enabled: None,
            video_enabled: None,
        }))
        .await;
    }

    pub async fn leave(&self, room_code: &str) {
        self.send(ClientEvent::LeaveRoom(RoomRef {
            room_code: room_code.to_string(),
        }))
        .await;
    }

    pub async fn wait_in(&self, room_code: &str, user_id: &str, display_name: &str) {
        self.send(ClientEvent::JoinWaitingRoom(JoinWaitingRoom {
            room_code: room_code.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            avatar: None,
        }))
        .await;
    }

    pub async fn admit(&self, room_code: &str, user_id: &str) {
        self.send(ClientEvent::AdmitUser(WaitingDecision {
            room_code: room_code.to_string(),
            user_id: user_id.to_string(),
            reason: None,
        }))
        .await;
    }

    pub async fn reject(&self, room_code: &str, user_id: &str, reason: Option<&str>) {
        self.send(ClientEvent::RejectUser(WaitingDecision {
            room_code: room_code.to_string(),
            user_id: user_id.to_string(),
            reason: reason.map(str::to_string),
        }))
        .await;
    }

    pub async fn chat(&self, room_code: &str, content: &str, recipient: Option<&str>) {
        self.send(ClientEvent::ChatMessage(SendChat {
            room_code: room_code.to_string(),
            content: content.to_string(),
            is_private: recipient.is_some(),
            recipient_id: recipient.map(str::to_string),
        }))
        .await;
    }

    /// Run the disconnect cascade for this connection.
    pub async fn disconnect(self) {
        self.broker.disconnect(&self.conn).await;
    }

    /// Next event, waiting up to the receive timeout.
    pub async fn recv(&mut self) -> ServerEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.outbox.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("outbox closed")
    }

    /// Skip events until one named `name` arrives, and return it.
    pub async fn expect(&mut self, name: &str) -> ServerEvent {
        loop {
            let event = self.recv().await;
            if event.name() == name {
                return event;
            }
        }
    }

    /// The next event must be an error with `code`.
    pub async fn expect_error(&mut self, code: ErrorCode) {
        match self.recv().await {
            ServerEvent::Error(payload) => assert_eq!(payload.code, code, "{}", payload.message),
            other => panic!("expected {code} error, got {}", other.name()),
        }
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbox.try_recv() {
            events.push(event);
        }
        events
    }

    /// Names of everything currently queued.
    pub fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }

    /// Nothing is queued.
    pub fn assert_quiet(&mut self) {
        let names = self.drain_names();
        assert!(names.is_empty(), "expected no events, got {names:?}");
    }
}
