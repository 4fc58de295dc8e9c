use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use onlyus_types::events::GatewayEvent;

/// Sending half of one live WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event for this connection only. Returns `false` if the
    /// connection is already gone.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// PIN -> the connection that most recently declared it.
///
/// Last writer wins: a second declaration for the same PIN replaces the
/// first. Removal is compare-and-remove on the connection id, so a stale
/// disconnect never evicts a newer connection.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<String, ConnHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` for `pin`. Returns the handle it replaced, if any.
    pub async fn mark_online(&self, pin: &str, handle: ConnHandle) -> Option<ConnHandle> {
        self.entries.write().await.insert(pin.to_string(), handle)
    }

    /// Remove `pin` only if `conn_id` is still the connection on record.
    pub async fn mark_offline(&self, pin: &str, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(pin) {
            Some(current) if current.conn_id == conn_id => {
                entries.remove(pin);
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, pin: &str) -> bool {
        self.entries.read().await.contains_key(pin)
    }

    pub async fn handle_for(&self, pin: &str) -> Option<ConnHandle> {
        self.entries.read().await.get(pin).cloned()
    }

    pub async fn online_pins(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}
