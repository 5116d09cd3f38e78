//! Broadcast channels.
//!
//! Each connection has an unbounded outbox drained by its writer task.
//! Connections subscribe to named channels: `room:{code}` for room-wide
//! broadcasts and `user:{id}` for targeted delivery (signaling relay,
//! admission decisions, private chat).
//!
//! Publishing pushes into outboxes synchronously, so events from one
//! publisher reach each subscriber in publish order.

use super::ConnectionId;
use common::types::RoomCode;
use dashmap::DashMap;
use signaling_protocol::ServerEvent;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// A broadcast channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
    #[must_use]
    pub fn room(code: &RoomCode) -> Self {
        Self(format!("room:{code}"))
    }

    #[must_use]
    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{user_id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outboxes and channel subscriptions.
#[derive(Debug, Default)]
pub struct ChannelHub {
    outboxes: DashMap<ConnectionId, UnboundedSender<ServerEvent>>,
    subscribers: DashMap<Channel, HashSet<ConnectionId>>,
    subscriptions: DashMap<ConnectionId, HashSet<Channel>>,
}

impl ChannelHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: &ConnectionId, outbox: UnboundedSender<ServerEvent>) {
        self.outboxes.insert(conn.clone(), outbox);
    }

    /// Drop the outbox and every subscription of a connection.
    pub fn unregister(&self, conn: &ConnectionId) {
        self.outboxes.remove(conn);
        let channels = self
            .subscriptions
            .remove(conn)
            .map(|(_, channels)| channels)
            .unwrap_or_default();
        for channel in channels {
            self.remove_subscriber(&channel, conn);
        }
    }

    pub fn subscribe(&self, conn: &ConnectionId, channel: Channel) {
        self.subscribers
            .entry(channel.clone())
            .or_default()
            .insert(conn.clone());
        self.subscriptions
            .entry(conn.clone())
            .or_default()
            .insert(channel);
    }

    pub fn unsubscribe(&self, conn: &ConnectionId, channel: &Channel) {
        if let Some(mut channels) = self.subscriptions.get_mut(conn) {
            channels.remove(channel);
        }
        self.remove_subscriber(channel, conn);
    }

    /// Deliver to one connection. Returns `false` if it is gone.
    pub fn send_to(&self, conn: &ConnectionId, event: ServerEvent) -> bool {
        match self.outboxes.get(conn) {
            Some(outbox) => outbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver to every subscriber of `channel` except `except`.
    /// Returns the number of connections reached.
    pub fn publish(
        &self,
        channel: &Channel,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let targets: Vec<ConnectionId> = self
            .subscribers
            .get(channel)
            .map(|subs| {
                subs.iter()
                    .filter(|c| Some(*c) != except)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let delivered = targets
            .iter()
            .filter(|conn| self.send_to(conn, event.clone()))
            .count();

        debug!(
            target: "room.broker",
            channel = channel.as_str(),
            event = event.name(),
            delivered,
            "Published"
        );
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.subscribers.get(channel).map_or(0, |s| s.len())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    fn remove_subscriber(&self, channel: &Channel, conn: &ConnectionId) {
        let now_empty = match self.subscribers.get_mut(channel) {
            Some(mut subs) => {
                subs.remove(conn);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.subscribers.remove_if(channel, |_, subs| subs.is_empty());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signaling_protocol::events::UserLeft;
    use tokio::sync::mpsc::unbounded_channel;

    fn user_left(id: &str) -> ServerEvent {
        ServerEvent::UserLeft(UserLeft {
            user_id: id.to_string(),
        })
    }

    #[test]
    fn test_publish_skips_excluded_connection() {
        let hub = ChannelHub::new();
        let code = RoomCode::parse("abc-def-ghi").unwrap();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        hub.register(&a, tx_a);
        hub.register(&b, tx_b);
        hub.subscribe(&a, Channel::room(&code));
        hub.subscribe(&b, Channel::room(&code));

        let delivered = hub.publish(&Channel::room(&code), &user_left("x"), Some(&a));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), user_left("x"));
    }

    #[test]
    fn test_unregister_removes_all_subscriptions() {
        let hub = ChannelHub::new();
        let code = RoomCode::parse("abc-def-ghi").unwrap();
        let conn = ConnectionId::new();
        let (tx, _rx) = unbounded_channel();
        hub.register(&conn, tx);
        hub.subscribe(&conn, Channel::room(&code));
        hub.subscribe(&conn, Channel::user("u"));

        hub.unregister(&conn);

        assert_eq!(hub.subscriber_count(&Channel::room(&code)), 0);
        assert_eq!(hub.subscriber_count(&Channel::user("u")), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.publish(&Channel::user("u"), &user_left("u"), None), 0);
    }

    #[test]
    fn test_unsubscribe_single_channel() {
        let hub = ChannelHub::new();
        let code = RoomCode::parse("abc-def-ghi").unwrap();
        let conn = ConnectionId::new();
        let (tx, mut rx) = unbounded_channel();
        hub.register(&conn, tx);
        hub.subscribe(&conn, Channel::room(&code));
        hub.subscribe(&conn, Channel::user("u"));

        hub.unsubscribe(&conn, &Channel::room(&code));

        assert_eq!(hub.publish(&Channel::room(&code), &user_left("x"), None), 0);
        assert_eq!(hub.publish(&Channel::user("u"), &user_left("y"), None), 1);
        assert_eq!(rx.try_recv().unwrap(), user_left("y"));
    }
}
