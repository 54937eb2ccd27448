use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typing indicator payload relayed between clients. Receivers filter for
/// relevance; the server does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStatus {
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub is_typing: bool,
    pub conversation_id: Option<i64>,
    pub display_name: Option<String>,
}

/// Presence snapshot entry returned by `QueryOnlineUsers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub online: bool,
}

/// Events sent over the WebSocket relay, server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A user's connection was registered
    UserConnected {
        user_id: Uuid,
        display_name: String,
        online: bool,
    },

    /// A user's connection went away
    UserDisconnected { user_id: Uuid },

    /// Broadcast payload relayed to every connection
    ReceiveMessage { payload: serde_json::Value },

    /// Targeted payload relayed to one recipient (and echoed to the sender)
    ReceivePrivateMessage {
        sender_id: Uuid,
        sender_name: String,
        payload: serde_json::Value,
        sent_at: DateTime<Utc>,
    },

    /// Typing indicator relayed to all connections
    UserTypingStatus { typing: TypingStatus },

    /// Presence snapshot, sent only to the connection that asked
    OnlineUsers { users: Vec<OnlineUser> },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatCommand {
    /// Relay a payload to every connected peer, sender included
    SendBroadcast { payload: serde_json::Value },

    /// Relay a payload to one online user. Dropped silently if the
    /// recipient is offline; durable persistence is a separate API call.
    SendPrivateMessage {
        recipient_user_id: Uuid,
        payload: serde_json::Value,
    },

    /// Broadcast a typing indicator
    NotifyTyping { typing: TypingStatus },

    /// Ask for the current presence snapshot
    QueryOnlineUsers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let cmd: ChatCommand = serde_json::from_str(
            r#"{"type":"SendPrivateMessage","data":{"recipient_user_id":"8d8ac610-566d-4ef0-9c22-186b2a5ed793","payload":{"text":"hi"}}}"#,
        )
        .unwrap();
        match cmd {
            ChatCommand::SendPrivateMessage { payload, .. } => {
                assert_eq!(payload["text"], "hi");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn query_online_users_needs_no_data() {
        let cmd: ChatCommand = serde_json::from_str(r#"{"type":"QueryOnlineUsers"}"#).unwrap();
        assert!(matches!(cmd, ChatCommand::QueryOnlineUsers));
    }
}
