use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{ChatCommand, ChatEvent};

use crate::dispatcher::Dispatcher;
use crate::presence::EventSender;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one WebSocket connection for its whole lifetime:
/// Connecting -> Connected -> Disconnected.
///
/// The token was already verified at the HTTP upgrade layer. A connection
/// with no resolvable identity proceeds unregistered: it gets no presence
/// entry and its private sends are ignored. Degraded, not fatal.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, identity: Option<Claims>) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    // Targeted channel for this connection. Registered under the user's
    // identity when there is one; the local handle also carries
    // caller-only replies and private-message echoes.
    let (tx, mut user_rx) = mpsc::unbounded_channel();

    let user_id = identity.as_ref().map(|c| c.sub);
    match &identity {
        Some(claims) => {
            dispatcher.register(claims.sub, claims.username.clone(), conn_id, tx.clone());
            info!("{} ({}) connected to relay", claims.username, claims.sub);
        }
        None => {
            info!(%conn_id, "unidentified connection, proceeding unregistered");
        }
    }

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();
    let identity_recv = identity.clone();
    let tx_recv = tx.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    // Presence announcements go to the *other* connections.
                    if is_own_presence_event(&event, user_id) {
                        continue;
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChatCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, identity_recv.as_ref(), &tx_recv, cmd);
                    }
                    Err(e) => {
                        warn!(
                            "bad command on connection {}: {} -- raw: {}",
                            conn_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either task finishing tears the connection down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(claims) = &identity {
        dispatcher.unregister(claims.sub, conn_id);
        info!("{} ({}) disconnected from relay", claims.username, claims.sub);
    }
}

/// Presence announcements about a user are suppressed on that user's own
/// connection; everyone else sees them.
fn is_own_presence_event(event: &ChatEvent, self_id: Option<Uuid>) -> bool {
    match event {
        ChatEvent::UserConnected { user_id, .. } | ChatEvent::UserDisconnected { user_id } => {
            Some(*user_id) == self_id
        }
        _ => false,
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ChatEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to serialize event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// One inbound relay command. Failures here are logged and swallowed; a bad
/// delivery never drops the session or surfaces to the caller.
fn handle_command(
    dispatcher: &Dispatcher,
    identity: Option<&Claims>,
    reply: &EventSender,
    cmd: ChatCommand,
) {
    match cmd {
        ChatCommand::SendBroadcast { payload } => {
            dispatcher.broadcast(ChatEvent::ReceiveMessage { payload });
        }

        ChatCommand::SendPrivateMessage {
            recipient_user_id,
            payload,
        } => {
            let Some(claims) = identity else {
                debug!("private send from unidentified connection ignored");
                return;
            };
            if let Some(echo) =
                dispatcher.send_private(claims.sub, claims.username.clone(), recipient_user_id, payload)
            {
                // Echo back so the sender's own UI reflects delivery.
                let _ = reply.send(echo);
            }
        }

        ChatCommand::NotifyTyping { typing } => {
            dispatcher.broadcast(ChatEvent::UserTypingStatus { typing });
        }

        ChatCommand::QueryOnlineUsers => {
            let _ = reply.send(ChatEvent::OnlineUsers {
                users: dispatcher.online_users(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(name: &str) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            username: name.to_string(),
            exp: 0,
        }
    }

    #[tokio::test]
    async fn broadcast_command_reaches_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let (reply, _reply_rx) = mpsc::unbounded_channel();
        let ana = claims("ana");

        handle_command(
            &dispatcher,
            Some(&ana),
            &reply,
            ChatCommand::SendBroadcast {
                payload: json!({"text": "hello everyone"}),
            },
        );

        match events.recv().await.unwrap() {
            ChatEvent::ReceiveMessage { payload } => {
                assert_eq!(payload["text"], "hello everyone");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn private_command_echoes_only_when_delivered() {
        let dispatcher = Dispatcher::new();
        let ana = claims("ana");
        let (reply, mut reply_rx) = mpsc::unbounded_channel();

        // Offline recipient: dropped silently, no echo.
        handle_command(
            &dispatcher,
            Some(&ana),
            &reply,
            ChatCommand::SendPrivateMessage {
                recipient_user_id: Uuid::new_v4(),
                payload: json!({"text": "hi"}),
            },
        );
        assert!(reply_rx.try_recv().is_err());

        // Online recipient: push plus echo.
        let bo = Uuid::new_v4();
        let (bo_tx, mut bo_rx) = mpsc::unbounded_channel();
        dispatcher.register(bo, "bo".into(), Uuid::new_v4(), bo_tx);

        handle_command(
            &dispatcher,
            Some(&ana),
            &reply,
            ChatCommand::SendPrivateMessage {
                recipient_user_id: bo,
                payload: json!({"text": "hi"}),
            },
        );
        assert!(matches!(
            bo_rx.try_recv().unwrap(),
            ChatEvent::ReceivePrivateMessage { .. }
        ));
        assert!(matches!(
            reply_rx.try_recv().unwrap(),
            ChatEvent::ReceivePrivateMessage { .. }
        ));
    }

    #[tokio::test]
    async fn unidentified_connection_cannot_send_private() {
        let dispatcher = Dispatcher::new();
        let bo = Uuid::new_v4();
        let (bo_tx, mut bo_rx) = mpsc::unbounded_channel();
        dispatcher.register(bo, "bo".into(), Uuid::new_v4(), bo_tx);

        let (reply, mut reply_rx) = mpsc::unbounded_channel();
        handle_command(
            &dispatcher,
            None,
            &reply,
            ChatCommand::SendPrivateMessage {
                recipient_user_id: bo,
                payload: json!({"text": "hi"}),
            },
        );
        assert!(bo_rx.try_recv().is_err());
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn online_snapshot_goes_only_to_the_caller() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let ana = claims("ana");
        let (ana_tx, _ana_rx) = mpsc::unbounded_channel();
        dispatcher.register(ana.sub, ana.username.clone(), Uuid::new_v4(), ana_tx);
        // Drain the UserConnected announcement.
        let _ = events.recv().await.unwrap();

        let (reply, mut reply_rx) = mpsc::unbounded_channel();
        handle_command(&dispatcher, Some(&ana), &reply, ChatCommand::QueryOnlineUsers);

        match reply_rx.try_recv().unwrap() {
            ChatEvent::OnlineUsers { users } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].user_id, ana.sub);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        // Nothing went out on the broadcast channel.
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn own_presence_events_are_suppressed() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mine = ChatEvent::UserDisconnected { user_id: me };
        let theirs = ChatEvent::UserDisconnected { user_id: other };

        assert!(is_own_presence_event(&mine, Some(me)));
        assert!(!is_own_presence_event(&theirs, Some(me)));
        assert!(!is_own_presence_event(&mine, None));
    }
}
