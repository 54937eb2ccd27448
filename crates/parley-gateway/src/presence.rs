use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use parley_types::events::{ChatEvent, OnlineUser};

/// Send-capability handle for one live connection. `send` fails once the
/// peer's receive loop is gone; callers swallow that.
pub type EventSender = mpsc::UnboundedSender<ChatEvent>;

/// Registry entry for a user with (or recently with) a live connection.
/// Disconnect flips `online` rather than evicting, so reconnects reuse the
/// slot; `snapshot` and lookups only ever expose online entries.
pub struct ConnectedUser {
    pub conn_id: Uuid,
    pub display_name: String,
    pub connected_at: DateTime<Utc>,
    pub online: bool,
    sender: EventSender,
}

/// In-memory presence map, shared by every connection. Entry-level atomic
/// upsert; no global lock serializing unrelated users.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<DashMap<Uuid, ConnectedUser>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert, last-connect-wins: a second connection for the
    /// same user overwrites the connection id and send handle. The earlier
    /// connection's socket stays open but is no longer reachable here.
    pub fn connect(&self, user_id: Uuid, conn_id: Uuid, display_name: String, sender: EventSender) {
        self.inner.insert(
            user_id,
            ConnectedUser {
                conn_id,
                display_name,
                connected_at: Utc::now(),
                online: true,
                sender,
            },
        );
    }

    /// Marks the user offline, but only if `conn_id` still owns the entry.
    /// A stale disconnect from a superseded connection must not evict the
    /// newer one. Returns whether the disconnect applied.
    pub fn disconnect(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        match self.inner.get_mut(&user_id) {
            Some(mut entry) if entry.conn_id == conn_id => {
                entry.online = false;
                true
            }
            _ => false,
        }
    }

    /// The live connection id, only while the user is online.
    pub fn connection_id(&self, user_id: Uuid) -> Option<Uuid> {
        self.inner
            .get(&user_id)
            .filter(|entry| entry.online)
            .map(|entry| entry.conn_id)
    }

    /// Best-effort push to a user's live connection. Returns false if the
    /// user is offline or the handle is already closed; never blocks.
    pub fn send_to(&self, user_id: Uuid, event: ChatEvent) -> bool {
        match self.inner.get(&user_id) {
            Some(entry) if entry.online => entry.sender.send(event).is_ok(),
            _ => false,
        }
    }

    /// Snapshot of everyone currently online. Not a live view; ordering is
    /// unspecified.
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        self.inner
            .iter()
            .filter(|entry| entry.online)
            .map(|entry| OnlineUser {
                user_id: *entry.key(),
                display_name: entry.display_name.clone(),
                online: true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (EventSender, mpsc::UnboundedReceiver<ChatEvent>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn last_connect_wins() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let (tx1, _rx1) = channel();
        let (tx2, mut rx2) = channel();

        registry.connect(user, c1, "ana".into(), tx1);
        registry.connect(user, c2, "ana".into(), tx2);

        assert_eq!(registry.connection_id(user), Some(c2));

        assert!(registry.send_to(user, ChatEvent::UserDisconnected { user_id: user }));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn stale_disconnect_does_not_evict_newer_connection() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        registry.connect(user, c1, "ana".into(), channel().0);
        registry.connect(user, c2, "ana".into(), channel().0);

        // The first device hangs up; its conn id no longer owns the entry.
        assert!(!registry.disconnect(user, c1));
        assert_eq!(registry.connection_id(user), Some(c2));

        assert!(registry.disconnect(user, c2));
        assert_eq!(registry.connection_id(user), None);
    }

    #[test]
    fn snapshot_skips_offline_entries() {
        let registry = PresenceRegistry::new();
        let ana = Uuid::new_v4();
        let bo = Uuid::new_v4();
        let conn_ana = Uuid::new_v4();
        let conn_bo = Uuid::new_v4();

        registry.connect(ana, conn_ana, "ana".into(), channel().0);
        registry.connect(bo, conn_bo, "bo".into(), channel().0);
        registry.disconnect(bo, conn_bo);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id, ana);
        assert!(snapshot[0].online);
    }

    #[test]
    fn push_to_offline_user_is_a_quiet_miss() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();
        assert!(!registry.send_to(user, ChatEvent::UserDisconnected { user_id: user }));

        let conn = Uuid::new_v4();
        let (tx, rx) = channel();
        registry.connect(user, conn, "ana".into(), tx);
        drop(rx);
        // Handle closed underneath us: still just a false, never a panic.
        assert!(!registry.send_to(user, ChatEvent::UserDisconnected { user_id: user }));
    }
}
