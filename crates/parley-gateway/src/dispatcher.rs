use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use parley_types::events::{ChatEvent, OnlineUser};

use crate::presence::{EventSender, PresenceRegistry};

/// Relay hub shared by every connection: a broadcast channel for fan-out
/// plus the presence registry for targeted pushes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<ChatEvent>,
    presence: PresenceRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: PresenceRegistry::new(),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Subscribe to relay-wide events. Every connection holds one receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Fan an event out to every connected client. Fire-and-forget; a relay
    /// with no subscribers is not an error.
    pub fn broadcast(&self, event: ChatEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a connection's send handle under its user identity and
    /// announce it to the other connections.
    pub fn register(
        &self,
        user_id: Uuid,
        display_name: String,
        conn_id: Uuid,
        sender: EventSender,
    ) {
        self.inner
            .presence
            .connect(user_id, conn_id, display_name.clone(), sender);

        self.broadcast(ChatEvent::UserConnected {
            user_id,
            display_name,
            online: true,
        });
    }

    /// Drop a connection's registration. Guarded by conn id: if a newer
    /// connection took over the user, this is a no-op and nothing is
    /// announced.
    pub fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        if self.inner.presence.disconnect(user_id, conn_id) {
            self.broadcast(ChatEvent::UserDisconnected { user_id });
        }
    }

    /// Push a payload to one online recipient. Returns the delivered event
    /// so the caller can echo it back on its own connection; None means the
    /// recipient was offline (or its handle already closed) and the payload
    /// was dropped at the realtime layer.
    pub fn send_private(
        &self,
        sender_id: Uuid,
        sender_name: String,
        recipient_user_id: Uuid,
        payload: serde_json::Value,
    ) -> Option<ChatEvent> {
        let event = ChatEvent::ReceivePrivateMessage {
            sender_id,
            sender_name,
            payload,
            sent_at: Utc::now(),
        };

        if self.inner.presence.send_to(recipient_user_id, event.clone()) {
            Some(event)
        } else {
            debug!(%recipient_user_id, "private message dropped, recipient offline");
            None
        }
    }

    /// Presence snapshot for `QueryOnlineUsers`.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.inner.presence.snapshot()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
