//! Signaling Broker.
//!
//! Routes client events for every live connection. Each connection owns an
//! outbox (see [`channels`]) and is bound to a user on its first join (see
//! [`registry`]). Events from one connection are handled one at a time in
//! arrival order by that connection's read loop; different connections run
//! concurrently and share no lock across store calls.
//!
//! Every handler failure becomes one `error` event on the calling connection.
//! A panicking handler is caught and reported the same way so it cannot take
//! down the read loop.
//!
//! Connected members keep their store records alive: every inbound event and
//! a periodic socket heartbeat call [`SignalingBroker::keepalive`], which
//! refreshes the participant and room TTLs at most once per keepalive
//! interval.

pub mod channels;
pub mod registry;
pub mod state_change;
pub mod ws;

use crate::errors::RoomError;
use crate::observability::metrics;
use crate::services::{
    check_permission, Capability, JoinOutcome, JoinRequest, RoomLifecycle, SettingsEngine,
    WaitingRoomGate,
};
use channels::{Channel, ChannelHub};
use common::clock::Clock;
use common::types::RoomCode;
use futures::FutureExt;
use registry::SessionRegistry;
use signaling_protocol::events::{
    AdmissionNotice, ChatMessage, JoinRoom, JoinWaitingRoom, ParticipantState,
    ParticipantStatePatch, PublicRoomSettings, RoomJoined, RoomRef, SendChat, SettingsChanged,
    SettingsSync, SignalFrom, SignalTo, ToggleMedia, UpdateSettings, UserJoined, UserLeft,
    UserWaiting, WaitingCountUpdated, WaitingDecision, WaitingRoomJoined, WaitingUsersList,
};
use signaling_protocol::{ClientEvent, ServerEvent};
use state_change::{default_listeners, StateChange, StateChangeListener};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Longest accepted chat message, in characters.
pub const MAX_CHAT_LENGTH: usize = 5000;

const WAITING_MESSAGE: &str = "Waiting for the host to let you in";
const ADMITTED_MESSAGE: &str = "The host has admitted you";
const REJECTED_MESSAGE: &str = "The host declined your request to join";

/// Opaque per-connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signaling broker. One instance per server.
pub struct SignalingBroker {
    lifecycle: Arc<RoomLifecycle>,
    waiting: Arc<WaitingRoomGate>,
    settings: Arc<SettingsEngine>,
    clock: Arc<dyn Clock>,
    keepalive_interval: Duration,
    registry: SessionRegistry,
    hub: ChannelHub,
    listeners: Vec<Box<dyn StateChangeListener>>,
    shutdown: CancellationToken,
}

impl SignalingBroker {
    #[must_use]
    pub fn new(
        lifecycle: Arc<RoomLifecycle>,
        waiting: Arc<WaitingRoomGate>,
        settings: Arc<SettingsEngine>,
        clock: Arc<dyn Clock>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            waiting,
            settings,
            clock,
            keepalive_interval,
            registry: SessionRegistry::new(),
            hub: ChannelHub::new(),
            listeners: default_listeners(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a new connection and return its outbox.
    pub fn connect(&self) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = unbounded_channel();
        self.hub.register(&conn, tx);
        metrics::connection_opened();
        debug!(target: "room.broker", connection_id = %conn, "Connection opened");
        (conn, rx)
    }

    /// Token cancelled when the server shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask every connection loop to run its disconnect cascade and exit.
    pub fn shutdown(&self) {
        info!(target: "room.broker", connections = self.hub.connection_count(), "Closing all connections");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub.connection_count()
    }

    /// How often a connected member's records are refreshed.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// Refresh the store TTLs for every room `conn` has joined, unless that
    /// happened within the last keepalive interval. Failures are logged;
    /// the next event or heartbeat retries.
    pub async fn keepalive(&self, conn: &ConnectionId) {
        let interval_ms = i64::try_from(self.keepalive_interval.as_millis()).unwrap_or(i64::MAX);
        let due = self
            .registry
            .due_for_keepalive(conn, self.clock.now_ms(), interval_ms);

        for (code, participant) in due {
            match self.lifecycle.touch_member(&code, &participant).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "room.broker", connection_id = %conn, room_code = %code, "No longer a member, dropping room from binding");
                    self.registry.remove_room(conn, &code);
                }
                Err(e) => {
                    warn!(target: "room.broker", connection_id = %conn, room_code = %code, error = %e, "Keepalive failed");
                }
            }
        }
    }

    /// Parse and handle one text frame.
    pub async fn handle_text(&self, conn: &ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(conn, event).await,
            Err(e) => {
                debug!(target: "room.broker", connection_id = %conn, error = %e, "Unparseable frame");
                self.reply_error(conn, &RoomError::InvalidMessage("Malformed message".to_string()));
            }
        }
    }

    /// Handle one client event. Never fails; errors go back to `conn`.
    pub async fn handle(&self, conn: &ConnectionId, event: ClientEvent) {
        let name = event.name();
        self.keepalive(conn).await;
        match AssertUnwindSafe(self.dispatch(conn, event))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                match &err {
                    RoomError::Store(_) | RoomError::Internal(_) => {
                        error!(target: "room.broker", connection_id = %conn, event = name, error = %err, "Handler failed");
                    }
                    _ => {
                        debug!(target: "room.broker", connection_id = %conn, event = name, error = %err, "Request rejected");
                    }
                }
                self.reply_error(conn, &err);
            }
            Err(_) => {
                error!(target: "room.broker", connection_id = %conn, event = name, "Handler panicked");
                self.reply_error(conn, &RoomError::Internal(format!("{name} handler panicked")));
            }
        }
    }

    /// Tear down a connection: leave every room the bound user is in, drop
    /// their waiting-room entries and release the binding.
    ///
    /// Rooms come from both the binding and the store's user index.
    #[instrument(skip_all, fields(connection_id = %conn))]
    pub async fn disconnect(&self, conn: &ConnectionId) {
        self.hub.unregister(conn);
        let binding = self.registry.unbind(conn);
        metrics::connection_closed();

        let (user_id, known_rooms) = match binding {
            Some(b) => (b.user_id, b.rooms.into_keys().collect::<Vec<_>>()),
            None => (conn.to_string(), Vec::new()),
        };

        match self.lifecycle.handle_disconnect(&user_id, &known_rooms).await {
            Ok(rooms) => {
                for code in rooms {
                    self.hub.publish(
                        &Channel::room(&code),
                        &ServerEvent::UserLeft(UserLeft {
                            user_id: user_id.clone(),
                        }),
                        None,
                    );
                }
            }
            Err(e) => {
                error!(target: "room.broker", user_id = %user_id, error = %e, "Disconnect cleanup failed");
            }
        }

        match self.waiting.remove_user_everywhere(&user_id).await {
            Ok(rooms) => {
                for code in rooms {
                    if let Err(e) = self.broadcast_waiting_update(&code).await {
                        warn!(target: "room.broker", room_code = %code, error = %e, "Waiting update after disconnect failed");
                    }
                }
            }
            Err(e) => {
                warn!(target: "room.broker", user_id = %user_id, error = %e, "Waiting-room cleanup failed");
            }
        }

        debug!(target: "room.broker", user_id = %user_id, "Connection closed");
    }

    async fn dispatch(&self, conn: &ConnectionId, event: ClientEvent) -> Result<(), RoomError> {
        match event {
            ClientEvent::JoinRoom(data) => {
                let result = self.join_room(conn, data).await;
                metrics::record_join(match &result {
                    Ok(()) => "success",
                    Err(e) => e.error_code().as_str(),
                });
                result
            }
            ClientEvent::LeaveRoom(data) => self.leave_room(conn, &data).await,
            ClientEvent::Offer(signal) => {
                self.relay(conn, "offer", signal, ServerEvent::Offer)
            }
            ClientEvent::Answer(signal) => {
                self.relay(conn, "answer", signal, ServerEvent::Answer)
            }
            ClientEvent::IceCandidate(signal) => {
                self.relay(conn, "ice-candidate", signal, ServerEvent::IceCandidate)
            }
            ClientEvent::ToggleAudio(data) => self.toggle_media(conn, &data, true).await,
            ClientEvent::ToggleVideo(data) => self.toggle_media(conn, &data, false).await,
            ClientEvent::ParticipantState(data) => self.participant_state(conn, data).await,
            ClientEvent::ChatMessage(data) => self.chat_message(conn, data).await,
            ClientEvent::JoinWaitingRoom(data) => self.join_waiting_room(conn, data).await,
            ClientEvent::AdmitUser(data) => self.decide_waiting(conn, &data, true).await,
            ClientEvent::RejectUser(data) => self.decide_waiting(conn, &data, false).await,
            ClientEvent::UpdateSettings(data) => self.update_settings(conn, &data).await,
            ClientEvent::GetSettings(data) => self.get_settings(conn, &data).await,
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    async fn join_room(&self, conn: &ConnectionId, data: JoinRoom) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let user_id = required(&data.user_id, "userId")?;
        let display_name = required(&data.display_name, "displayName")?;
        self.ensure_binding_matches(conn, &user_id)?;

        let mut audio_enabled = data.audio_enabled.unwrap_or(true);
        let mut video_enabled = data.video_enabled.unwrap_or(true);

        // Gates apply to an existing, live room. A missing or stale room is
        // (re)created by this join with the joiner as host.
        let mut live_room = self.lifecycle.room(&code).await?;
        if let Some(meta) = &live_room {
            if self.lifecycle.should_cleanup_room(meta).await? {
                live_room = None;
            }
        }
        if let Some(meta) = live_room.filter(|m| m.host_id != user_id) {
            let settings = self.settings.get_settings(&code).await?;
            self.settings
                .check_password(&settings, data.password.as_ref())
                .await?;
            if settings.is_locked {
                return Err(RoomError::RoomLocked);
            }
            let already_member = self.lifecycle.is_member(&code, &user_id).await?;
            if settings.waiting_room_enabled
                && !already_member
                && !self.waiting.is_admitted(&code, &user_id).await?
            {
                return Err(RoomError::WaitingRoomRequired);
            }
            if !already_member {
                let count = self.lifecycle.member_count(&code).await?;
                let max = settings.max_participants;
                if u32::try_from(count).unwrap_or(u32::MAX) >= max {
                    return Err(RoomError::RoomFull(max));
                }
            }
            audio_enabled &= settings.permissions.microphone;
            video_enabled &= settings.permissions.camera;
            debug!(target: "room.broker", room_code = %meta.code, user_id = %user_id, "Join gates passed");
        }

        let JoinOutcome {
            participant,
            participants,
            ..
        } = self
            .lifecycle
            .join_room(
                &code,
                &JoinRequest {
                    user_id: user_id.clone(),
                    display_name,
                    audio_enabled,
                    video_enabled,
                },
            )
            .await?;

        if !self.registry.bind(conn, &user_id) {
            error!(target: "room.broker", connection_id = %conn, user_id = %user_id, "Connection rebound to another user during join");
            return Err(binding_conflict());
        }
        self.registry
            .add_room(conn, &code, participant.clone(), self.clock.now_ms());
        self.hub.subscribe(conn, Channel::room(&code));
        self.hub.subscribe(conn, Channel::user(&user_id));

        self.hub.send_to(
            conn,
            ServerEvent::RoomJoined(RoomJoined {
                room_code: code.to_string(),
                participants,
            }),
        );
        let is_host = participant.is_host;
        self.hub.publish(
            &Channel::room(&code),
            &ServerEvent::UserJoined(UserJoined { participant }),
            Some(conn),
        );

        if is_host {
            let users = self.waiting.waiting_users(&code).await?;
            if !users.is_empty() {
                self.hub.send_to(
                    conn,
                    ServerEvent::WaitingUsersList(WaitingUsersList {
                        room_code: code.to_string(),
                        users,
                    }),
                );
            }
        }

        info!(target: "room.broker", room_code = %code, user_id = %user_id, is_host, "User joined room");
        Ok(())
    }

    async fn leave_room(&self, conn: &ConnectionId, data: &RoomRef) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let user_id = self.bound_user(conn, &code)?;

        let outcome = self.lifecycle.leave_room(&code, &user_id).await?;
        self.registry.remove_room(conn, &code);
        self.hub.unsubscribe(conn, &Channel::room(&code));

        if !outcome.removed {
            return Err(RoomError::NotInRoom(code.to_string()));
        }
        self.hub.publish(
            &Channel::room(&code),
            &ServerEvent::UserLeft(UserLeft { user_id }),
            None,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Relay
    // ------------------------------------------------------------------

    fn relay<T>(
        &self,
        conn: &ConnectionId,
        kind: &'static str,
        signal: SignalTo<T>,
        wrap: fn(SignalFrom<T>) -> ServerEvent,
    ) -> Result<(), RoomError> {
        let from = self
            .registry
            .user_id(conn)
            .ok_or_else(|| RoomError::NotInRoom("no room joined".to_string()))?;
        let to = required(&signal.to, "to")?;

        let delivered = self.hub.publish(
            &Channel::user(&to),
            &wrap(SignalFrom {
                from: from.clone(),
                payload: signal.payload,
            }),
            None,
        );
        if delivered == 0 {
            debug!(target: "room.broker", from = %from, to = %to, kind, "Relay target not connected");
        }
        metrics::record_signaling_relayed(kind);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Participant state
    // ------------------------------------------------------------------

    async fn toggle_media(
        &self,
        conn: &ConnectionId,
        data: &ToggleMedia,
        audio: bool,
    ) -> Result<(), RoomError> {
        let patch = if audio {
            ParticipantStatePatch {
                audio_enabled: Some(data.enabled),
                ..ParticipantStatePatch::default()
            }
        } else {
            ParticipantStatePatch {
                video_enabled: Some(data.enabled),
                ..ParticipantStatePatch::default()
            }
        };
        let code = parse_code(&data.room_code)?;
        self.apply_state(conn, &code, patch).await
    }

    async fn participant_state(
        &self,
        conn: &ConnectionId,
        data: ParticipantState,
    ) -> Result<(), RoomError> {
        if data.state.is_empty() {
            return Err(RoomError::InvalidMessage(
                "State update has no fields".to_string(),
            ));
        }
        let code = parse_code(&data.room_code)?;
        self.apply_state(conn, &code, data.state).await
    }

    async fn apply_state(
        &self,
        conn: &ConnectionId,
        code: &RoomCode,
        patch: ParticipantStatePatch,
    ) -> Result<(), RoomError> {
        let user_id = self.bound_user(conn, code)?;
        let current = self
            .lifecycle
            .participant(code, &user_id)
            .await?
            .ok_or_else(|| RoomError::NotInRoom(code.to_string()))?;

        let enabling = [
            (patch.audio_enabled, Capability::Microphone),
            (patch.video_enabled, Capability::Camera),
            (patch.is_screen_sharing, Capability::ScreenShare),
        ];
        if !current.is_host && enabling.iter().any(|(on, _)| *on == Some(true)) {
            let settings = self.settings.get_settings(code).await?;
            for (_, capability) in enabling.iter().filter(|(on, _)| *on == Some(true)) {
                check_permission(&settings, false, *capability)?;
            }
        }

        let updated = self
            .lifecycle
            .update_participant(code, &user_id, &patch)
            .await?;
        self.registry.update_participant(conn, code, updated);

        let change = StateChange {
            room_code: code.clone(),
            user_id,
            patch,
            timestamp: self.clock.now_ms(),
        };
        for event in self.listeners.iter().filter_map(|l| l.on_change(&change)) {
            self.hub
                .publish(&Channel::room(&change.room_code), &event, Some(conn));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    async fn chat_message(&self, conn: &ConnectionId, data: SendChat) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let user_id = self.bound_user(conn, &code)?;
        let sender = self
            .lifecycle
            .participant(&code, &user_id)
            .await?
            .ok_or_else(|| RoomError::NotInRoom(code.to_string()))?;

        let content = data.content.trim();
        if content.is_empty() {
            return Err(RoomError::InvalidMessage("Message is empty".to_string()));
        }
        if content.chars().count() > MAX_CHAT_LENGTH {
            return Err(RoomError::InvalidMessage(format!(
                "Message exceeds {MAX_CHAT_LENGTH} characters"
            )));
        }

        let settings = self.settings.get_settings(&code).await?;
        check_permission(&settings, sender.is_host, Capability::Chat)?;

        let recipient_id = if data.is_private {
            let recipient = data
                .recipient_id
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    RoomError::InvalidMessage("Private message needs a recipient".to_string())
                })?;
            if !self.lifecycle.is_member(&code, recipient).await? {
                return Err(RoomError::NotInRoom(recipient.to_string()));
            }
            Some(recipient.to_string())
        } else {
            None
        };

        let message = ServerEvent::ChatMessage(ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: user_id.clone(),
            sender_name: sender.display_name,
            content: content.to_string(),
            timestamp: self.clock.now_ms(),
            is_private: data.is_private,
            recipient_id: recipient_id.clone(),
        });

        match recipient_id {
            Some(recipient) => {
                if recipient != user_id {
                    self.hub
                        .publish(&Channel::user(&recipient), &message, Some(conn));
                }
                self.hub.send_to(conn, message);
            }
            None => {
                self.hub.publish(&Channel::room(&code), &message, None);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waiting room
    // ------------------------------------------------------------------

    async fn join_waiting_room(
        &self,
        conn: &ConnectionId,
        data: JoinWaitingRoom,
    ) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let user_id = required(&data.user_id, "userId")?;
        let display_name = required(&data.display_name, "displayName")?;
        self.ensure_binding_matches(conn, &user_id)?;

        let (entry, waiting_count) = self
            .waiting
            .enqueue(&code, &user_id, &display_name, data.avatar)
            .await?;

        if !self.registry.bind(conn, &user_id) {
            error!(target: "room.broker", connection_id = %conn, user_id = %user_id, "Connection rebound to another user while queuing");
            return Err(binding_conflict());
        }
        self.hub.subscribe(conn, Channel::user(&user_id));

        self.hub.send_to(
            conn,
            ServerEvent::WaitingRoomJoined(WaitingRoomJoined {
                room_code: code.to_string(),
                position: waiting_count,
                message: WAITING_MESSAGE.to_string(),
            }),
        );
        self.hub.publish(
            &Channel::room(&code),
            &ServerEvent::UserWaiting(UserWaiting {
                room_code: code.to_string(),
                user: entry,
                waiting_count,
            }),
            None,
        );
        self.send_waiting_list_to_host(&code).await?;

        info!(target: "room.broker", room_code = %code, user_id = %user_id, waiting_count, "User entered waiting room");
        Ok(())
    }

    async fn decide_waiting(
        &self,
        conn: &ConnectionId,
        data: &WaitingDecision,
        admit: bool,
    ) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let host = self.bound_user(conn, &code)?;
        self.require_host(&code, &host).await?;

        let (event, verb) = if admit {
            self.waiting.admit(&code, &data.user_id).await?;
            (
                ServerEvent::Admitted(AdmissionNotice {
                    room_code: code.to_string(),
                    message: ADMITTED_MESSAGE.to_string(),
                }),
                "admitted",
            )
        } else {
            self.waiting.reject(&code, &data.user_id).await?;
            let message = data
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(REJECTED_MESSAGE);
            (
                ServerEvent::Rejected(AdmissionNotice {
                    room_code: code.to_string(),
                    message: message.to_string(),
                }),
                "rejected",
            )
        };

        self.hub
            .publish(&Channel::user(&data.user_id), &event, None);
        self.broadcast_waiting_update(&code).await?;

        info!(target: "room.broker", room_code = %code, user_id = %data.user_id, decision = verb, "Waiting user decided");
        Ok(())
    }

    /// Broadcast the queue length to the room and the full list to the host.
    async fn broadcast_waiting_update(&self, code: &RoomCode) -> Result<(), RoomError> {
        let waiting_count = self.waiting.waiting_count(code).await?;
        self.hub.publish(
            &Channel::room(code),
            &ServerEvent::WaitingCountUpdated(WaitingCountUpdated {
                room_code: code.to_string(),
                waiting_count,
            }),
            None,
        );
        self.send_waiting_list_to_host(code).await
    }

    async fn send_waiting_list_to_host(&self, code: &RoomCode) -> Result<(), RoomError> {
        let Some(host_id) = self.lifecycle.host_id(code).await? else {
            return Ok(());
        };
        let users = self.waiting.waiting_users(code).await?;
        self.hub.publish(
            &Channel::user(&host_id),
            &ServerEvent::WaitingUsersList(WaitingUsersList {
                room_code: code.to_string(),
                users,
            }),
            None,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    async fn update_settings(
        &self,
        conn: &ConnectionId,
        data: &UpdateSettings,
    ) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        let user_id = self
            .registry
            .user_id(conn)
            .ok_or(RoomError::NotHost)?;
        self.require_host(&code, &user_id).await?;

        let settings = self.settings.update_settings(&code, &data.settings).await?;
        self.announce_settings(&code, settings.to_public(), &user_id);
        Ok(())
    }

    /// Broadcast `room:settings-changed` to everyone in the room, the host
    /// included. Also used by the HTTP settings endpoint.
    pub fn announce_settings(
        &self,
        code: &RoomCode,
        settings: PublicRoomSettings,
        changed_by: &str,
    ) {
        self.hub.publish(
            &Channel::room(code),
            &ServerEvent::SettingsChanged(SettingsChanged {
                room_code: code.to_string(),
                settings,
                changed_by: changed_by.to_string(),
                timestamp: self.clock.now_ms(),
            }),
            None,
        );
    }

    async fn get_settings(&self, conn: &ConnectionId, data: &RoomRef) -> Result<(), RoomError> {
        let code = parse_code(&data.room_code)?;
        if self.lifecycle.room(&code).await?.is_none() {
            return Err(RoomError::RoomNotFound(code.to_string()));
        }
        let settings = self.settings.get_public_settings(&code).await?;
        self.hub.send_to(
            conn,
            ServerEvent::SettingsSync(SettingsSync {
                room_code: code.to_string(),
                settings,
            }),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn reply_error(&self, conn: &ConnectionId, err: &RoomError) {
        let code = err.error_code();
        metrics::record_broker_error(code.as_str());
        self.hub
            .send_to(conn, ServerEvent::error(code, err.client_message()));
    }

    /// The user bound to `conn`; unbound connections are not in any room.
    fn bound_user(&self, conn: &ConnectionId, code: &RoomCode) -> Result<String, RoomError> {
        self.registry
            .user_id(conn)
            .ok_or_else(|| RoomError::NotInRoom(code.to_string()))
    }

    fn ensure_binding_matches(&self, conn: &ConnectionId, user_id: &str) -> Result<(), RoomError> {
        match self.registry.user_id(conn) {
            Some(bound) if bound != user_id => Err(binding_conflict()),
            _ => Ok(()),
        }
    }

    async fn require_host(&self, code: &RoomCode, user_id: &str) -> Result<(), RoomError> {
        let host_id = self
            .lifecycle
            .host_id(code)
            .await?
            .ok_or_else(|| RoomError::RoomNotFound(code.to_string()))?;
        if host_id == user_id {
            Ok(())
        } else {
            Err(RoomError::NotHost)
        }
    }
}

fn binding_conflict() -> RoomError {
    RoomError::InvalidMessage("Connection is already bound to another user".to_string())
}

fn parse_code(input: &str) -> Result<RoomCode, RoomError> {
    RoomCode::parse(input).map_err(|_| RoomError::InvalidMessage("Malformed room code".to_string()))
}

fn required(value: &str, field: &str) -> Result<String, RoomError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RoomError::InvalidMessage(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}
