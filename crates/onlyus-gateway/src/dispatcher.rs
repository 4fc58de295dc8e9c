use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{error, info};
use uuid::Uuid;

use onlyus_types::events::GatewayEvent;

use crate::presence::{ConnHandle, PresenceRegistry};

/// An event serialized once for every connection.
///
/// `recipients == None` means every connection receives it. Otherwise it is
/// the set of connections subscribed to the channel at the moment the event
/// was emitted; a connection that subscribes later never sees it.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub recipients: Option<Arc<HashSet<Uuid>>>,
    pub json: Arc<str>,
}

impl Broadcast {
    /// Whether connection `conn_id` should forward this to its client.
    pub fn reaches(&self, conn_id: Uuid) -> bool {
        match &self.recipients {
            None => true,
            Some(conns) => conns.contains(&conn_id),
        }
    }
}

/// Fan-out for all connected clients plus the presence table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Single emission point, so one channel's events keep their order
    broadcast_tx: broadcast::Sender<Broadcast>,

    presence: PresenceRegistry,

    /// conn_id -> channel ids this connection opened
    subscriptions: RwLock<HashMap<Uuid, HashSet<String>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: PresenceRegistry::new(),
                subscriptions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Subscribe to broadcast events. Filter with [`Broadcast::reaches`].
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Create the targeted channel for a new connection.
    pub async fn register_connection(&self) -> (ConnHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (handle, rx) = ConnHandle::new();
        self.inner
            .subscriptions
            .write()
            .await
            .insert(handle.conn_id(), HashSet::new());
        (handle, rx)
    }

    pub async fn unregister_connection(&self, conn_id: Uuid) {
        self.inner.subscriptions.write().await.remove(&conn_id);
    }

    /// Add one channel to a connection's subscriptions. Earlier ones stay.
    pub async fn subscribe_channel(&self, conn_id: Uuid, channel_id: &str) {
        if let Some(channels) = self.inner.subscriptions.write().await.get_mut(&conn_id) {
            channels.insert(channel_id.to_string());
        }
    }

    /// Forget every channel this connection opened. Used when the
    /// connection starts speaking for a different PIN.
    pub async fn clear_subscriptions(&self, conn_id: Uuid) {
        if let Some(channels) = self.inner.subscriptions.write().await.get_mut(&conn_id) {
            channels.clear();
        }
    }

    pub async fn is_subscribed(&self, conn_id: Uuid, channel_id: &str) -> bool {
        self.inner
            .subscriptions
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|channels| channels.contains(channel_id))
    }

    /// Deliver to every connection.
    pub fn broadcast_all(&self, event: &GatewayEvent) {
        self.emit(None, event);
    }

    /// Deliver to every connection subscribed to `channel_id` right now.
    pub async fn broadcast_to_channel(&self, channel_id: &str, event: &GatewayEvent) {
        let recipients: HashSet<Uuid> = self
            .inner
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, channels)| channels.contains(channel_id))
            .map(|(conn_id, _)| *conn_id)
            .collect();
        self.emit(Some(Arc::new(recipients)), event);
    }

    fn emit(&self, recipients: Option<Arc<HashSet<Uuid>>>, event: &GatewayEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize broadcast event: {}", e);
                return;
            }
        };
        // No receivers just means nobody is connected
        let _ = self.inner.broadcast_tx.send(Broadcast {
            recipients,
            json: json.into(),
        });
    }

    /// Deliver to `pin`'s current connection. Offline PINs are dropped
    /// silently; there is no mailbox.
    pub async fn notify_pin(&self, pin: &str, event: GatewayEvent) -> bool {
        match self.inner.presence.handle_for(pin).await {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    /// Like [`Dispatcher::notify_pin`], but skipped when `pin`'s current
    /// connection already gets `channel_id` broadcasts.
    pub async fn notify_pin_unless_subscribed(
        &self,
        pin: &str,
        channel_id: &str,
        event: GatewayEvent,
    ) -> bool {
        let subscribed = match self.inner.presence.handle_for(pin).await {
            Some(handle) => self.is_subscribed(handle.conn_id(), channel_id).await,
            None => false,
        };
        if subscribed {
            return false;
        }
        self.notify_pin(pin, event).await
    }

    /// Mark `pin` online on `handle` and tell everyone.
    pub async fn user_online(&self, pin: &str, handle: ConnHandle) {
        let conn_id = handle.conn_id();
        if let Some(previous) = self.inner.presence.mark_online(pin, handle).await {
            info!(
                "{} taken over by connection {} (was {})",
                pin,
                conn_id,
                previous.conn_id()
            );
        }

        self.broadcast_all(&GatewayEvent::PresenceChanged {
            pin: pin.to_string(),
            online: true,
        });
    }

    /// Mark `pin` offline, but only if `conn_id` still owns it.
    pub async fn user_offline(&self, pin: &str, conn_id: Uuid) {
        if !self.inner.presence.mark_offline(pin, conn_id).await {
            // A newer connection has taken over; don't touch anything
            return;
        }

        self.broadcast_all(&GatewayEvent::PresenceChanged {
            pin: pin.to_string(),
            online: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(msg: &Broadcast) -> GatewayEvent {
        serde_json::from_str(&msg.json).unwrap()
    }

    #[tokio::test]
    async fn channel_broadcast_only_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let (subscribed, _rx1) = dispatcher.register_connection().await;
        let (other, _rx2) = dispatcher.register_connection().await;
        let mut rx = dispatcher.subscribe();

        dispatcher.subscribe_channel(subscribed.conn_id(), "111111-222222").await;
        dispatcher
            .broadcast_to_channel("111111-222222", &GatewayEvent::AllChatsDeleted {})
            .await;

        let msg = rx.try_recv().unwrap();
        assert!(msg.reaches(subscribed.conn_id()));
        assert!(!msg.reaches(other.conn_id()));
    }

    #[tokio::test]
    async fn late_subscriber_misses_queued_broadcast() {
        let dispatcher = Dispatcher::new();
        let (early, _rx1) = dispatcher.register_connection().await;
        let (late, _rx2) = dispatcher.register_connection().await;
        let mut rx = dispatcher.subscribe();

        dispatcher.subscribe_channel(early.conn_id(), "111111-222222").await;
        dispatcher
            .broadcast_to_channel("111111-222222", &GatewayEvent::AllChatsDeleted {})
            .await;
        // Still queued when the second connection opens the channel
        dispatcher.subscribe_channel(late.conn_id(), "111111-222222").await;

        let msg = rx.try_recv().unwrap();
        assert!(msg.reaches(early.conn_id()));
        assert!(!msg.reaches(late.conn_id()));
    }

    #[tokio::test]
    async fn clear_subscriptions_keeps_connection_registered() {
        let dispatcher = Dispatcher::new();
        let (conn, _rx) = dispatcher.register_connection().await;

        dispatcher.subscribe_channel(conn.conn_id(), "a").await;
        dispatcher.clear_subscriptions(conn.conn_id()).await;
        assert!(!dispatcher.is_subscribed(conn.conn_id(), "a").await);

        dispatcher.subscribe_channel(conn.conn_id(), "b").await;
        assert!(dispatcher.is_subscribed(conn.conn_id(), "b").await);
    }

    #[tokio::test]
    async fn subscriptions_accumulate() {
        let dispatcher = Dispatcher::new();
        let (conn, _rx) = dispatcher.register_connection().await;

        dispatcher.subscribe_channel(conn.conn_id(), "a").await;
        dispatcher.subscribe_channel(conn.conn_id(), "b").await;
        assert!(dispatcher.is_subscribed(conn.conn_id(), "a").await);
        assert!(dispatcher.is_subscribed(conn.conn_id(), "b").await);

        dispatcher.unregister_connection(conn.conn_id()).await;
        assert!(!dispatcher.is_subscribed(conn.conn_id(), "a").await);
    }

    #[tokio::test]
    async fn presence_changes_are_broadcast_to_all() {
        let dispatcher = Dispatcher::new();
        let (conn, _rx) = dispatcher.register_connection().await;
        let mut rx = dispatcher.subscribe();

        dispatcher.user_online("111111", conn.clone()).await;
        dispatcher.user_offline("111111", conn.conn_id()).await;

        let online = rx.try_recv().unwrap();
        assert!(online.recipients.is_none());
        assert_eq!(
            decode(&online),
            GatewayEvent::PresenceChanged {
                pin: "111111".into(),
                online: true,
            }
        );
        assert_eq!(
            decode(&rx.try_recv().unwrap()),
            GatewayEvent::PresenceChanged {
                pin: "111111".into(),
                online: false,
            }
        );
    }

    #[tokio::test]
    async fn stale_offline_is_silent() {
        let dispatcher = Dispatcher::new();
        let (first, _rx1) = dispatcher.register_connection().await;
        let (second, _rx2) = dispatcher.register_connection().await;

        dispatcher.user_online("111111", first.clone()).await;
        dispatcher.user_online("111111", second.clone()).await;

        let mut rx = dispatcher.subscribe();
        dispatcher.user_offline("111111", first.conn_id()).await;
        assert!(rx.try_recv().is_err());
        assert!(dispatcher.presence().is_online("111111").await);
    }

    #[tokio::test]
    async fn notify_skips_offline_and_subscribed() {
        let dispatcher = Dispatcher::new();
        let event = GatewayEvent::DirectNotify {
            from_pin: "111111".into(),
            from_display_name: "Ana".into(),
            text: "hi".into(),
        };

        assert!(!dispatcher.notify_pin("222222", event.clone()).await);

        let (conn, mut rx) = dispatcher.register_connection().await;
        dispatcher.user_online("222222", conn.clone()).await;
        assert!(
            dispatcher
                .notify_pin_unless_subscribed("222222", "111111-222222", event.clone())
                .await
        );
        assert_eq!(rx.try_recv().unwrap(), event);

        dispatcher.subscribe_channel(conn.conn_id(), "111111-222222").await;
        assert!(
            !dispatcher
                .notify_pin_unless_subscribed("222222", "111111-222222", event)
                .await
        );
        assert!(rx.try_recv().is_err());
    }
}
