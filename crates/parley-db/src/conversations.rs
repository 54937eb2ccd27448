//! Conversation store: membership checks, listing with last-message preview,
//! creation with participant validation.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use parley_types::api::{ConversationDetail, ConversationPreview};
use parley_types::error::{ChatError, ChatResult};
use parley_types::models::{Conversation, ConversationKind, Participant, UserSummary};

use crate::rows::{MESSAGE_COLS, conversation_from_row, message_from_row, uuid_col};
use crate::users::count_existing_users;
use crate::{Database, OptionalExt, StoreExt};

impl Database {
    /// The single authorization primitive: true iff an active (non-left)
    /// participant row exists. Every other conversation/message operation
    /// consults this before returning data.
    pub fn is_participant(&self, conversation_id: i64, user_id: Uuid) -> ChatResult<bool> {
        self.with_conn(|conn| participant_exists(conn, conversation_id, user_id).store_err())
    }

    /// Every conversation the user actively participates in, each with its
    /// most recent non-deleted message (or none if the history is empty).
    pub fn conversations_for_user(&self, user_id: Uuid) -> ChatResult<Vec<ConversationPreview>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.id, c.kind, c.title, c.is_active, c.created_at, c.updated_at
                     FROM conversations c
                     JOIN conversation_participants cp ON cp.conversation_id = c.id
                     WHERE cp.user_id = ?1 AND cp.left_at IS NULL
                     ORDER BY c.id",
                )
                .store_err()?;

            let conversations = stmt
                .query_map([user_id.to_string()], |row| conversation_from_row(row, 0))
                .store_err()?
                .collect::<Result<Vec<_>, _>>()
                .store_err()?;

            let mut last_stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages m
                     WHERE m.conversation_id = ?1 AND m.is_deleted = 0
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT 1"
                ))
                .store_err()?;

            let mut previews = Vec::with_capacity(conversations.len());
            for conversation in conversations {
                let last_message = last_stmt
                    .query_row([conversation.id], |row| message_from_row(row, 0))
                    .optional()?;
                previews.push(ConversationPreview {
                    conversation,
                    last_message,
                });
            }
            Ok(previews)
        })
    }

    /// NotFound if the conversation does not exist, Forbidden if the
    /// requester is not an active participant.
    pub fn conversation_with_participants(
        &self,
        conversation_id: i64,
        requesting_user_id: Uuid,
    ) -> ChatResult<ConversationDetail> {
        self.with_conn(|conn| {
            let conversation = query_conversation(conn, conversation_id)?
                .ok_or(ChatError::NotFound("conversation"))?;

            if !participant_exists(conn, conversation_id, requesting_user_id).store_err()? {
                return Err(ChatError::Forbidden);
            }

            let participants = query_participants(conn, conversation_id)?;
            Ok(ConversationDetail {
                conversation,
                participants,
            })
        })
    }

    /// Persists the conversation and its initial participant rows in one
    /// transaction. The creator is always inserted as the admin row;
    /// duplicate ids collapse to one membership.
    pub fn create_conversation(
        &self,
        creator: Uuid,
        participant_ids: &[Uuid],
        kind: ConversationKind,
        title: Option<&str>,
    ) -> ChatResult<Conversation> {
        if participant_ids.is_empty() {
            return Err(ChatError::InvalidArgument(
                "conversation needs at least one participant",
            ));
        }

        let mut members: Vec<Uuid> = vec![creator];
        for &id in participant_ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }

        self.with_conn(|conn| {
            let tx = conn.transaction().store_err()?;

            let existing = count_existing_users(&tx, &members).store_err()?;
            if existing != members.len() {
                return Err(ChatError::NotFound("user"));
            }

            let now = Utc::now();
            tx.execute(
                "INSERT INTO conversations (kind, title, is_active, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)",
                (kind.as_str(), title, now),
            )
            .store_err()?;
            let conversation_id = tx.last_insert_rowid();

            {
                let mut insert = tx
                    .prepare(
                        "INSERT INTO conversation_participants
                             (conversation_id, user_id, is_admin, joined_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .store_err()?;
                for member in &members {
                    insert
                        .execute((conversation_id, member.to_string(), *member == creator, now))
                        .store_err()?;
                }
            }

            tx.commit().store_err()?;

            Ok(Conversation {
                id: conversation_id,
                kind,
                title: title.map(str::to_owned),
                is_active: true,
                created_at: now,
                updated_at: Some(now),
            })
        })
    }

    /// All users sharing at least one conversation with `user_id`,
    /// deduplicated, excluding the user themself.
    pub fn conversation_partners(&self, user_id: Uuid) -> ChatResult<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT u.id, u.username, u.avatar
                     FROM conversation_participants mine
                     JOIN conversation_participants other
                          ON other.conversation_id = mine.conversation_id
                     JOIN users u ON u.id = other.user_id
                     WHERE mine.user_id = ?1 AND mine.left_at IS NULL
                       AND other.user_id != ?1 AND other.left_at IS NULL
                     ORDER BY u.username",
                )
                .store_err()?;

            stmt.query_map([user_id.to_string()], |row| {
                Ok(UserSummary {
                    user_id: uuid_col(row, 0)?,
                    username: row.get(1)?,
                    avatar: row.get(2)?,
                })
            })
            .store_err()?
            .collect::<Result<Vec<_>, _>>()
            .store_err()
        })
    }

    /// Closes the active membership window. Membership checks go false
    /// immediately; rejoining later inserts a fresh row.
    pub fn leave_conversation(&self, conversation_id: i64, user_id: Uuid) -> ChatResult<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE conversation_participants SET left_at = ?1
                     WHERE conversation_id = ?2 AND user_id = ?3 AND left_at IS NULL",
                    (Utc::now(), conversation_id, user_id.to_string()),
                )
                .store_err()?;
            if updated == 0 {
                return Err(ChatError::NotFound("participant"));
            }
            Ok(())
        })
    }

    pub fn mark_read(
        &self,
        conversation_id: i64,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE conversation_participants SET last_read_at = ?1
                     WHERE conversation_id = ?2 AND user_id = ?3 AND left_at IS NULL",
                    (at, conversation_id, user_id.to_string()),
                )
                .store_err()?;
            if updated == 0 {
                return Err(ChatError::NotFound("participant"));
            }
            Ok(())
        })
    }
}

pub(crate) fn participant_exists(
    conn: &Connection,
    conversation_id: i64,
    user_id: Uuid,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL
         )",
        (conversation_id, user_id.to_string()),
        |row| row.get(0),
    )
}

pub(crate) fn query_conversation(
    conn: &Connection,
    conversation_id: i64,
) -> ChatResult<Option<Conversation>> {
    conn.query_row(
        "SELECT id, kind, title, is_active, created_at, updated_at
         FROM conversations WHERE id = ?1",
        [conversation_id],
        |row| conversation_from_row(row, 0),
    )
    .optional()
}

fn query_participants(conn: &Connection, conversation_id: i64) -> ChatResult<Vec<Participant>> {
    let mut stmt = conn
        .prepare(
            "SELECT cp.conversation_id, cp.user_id, u.username, u.avatar,
                    cp.is_admin, cp.joined_at, cp.left_at, cp.last_read_at
             FROM conversation_participants cp
             JOIN users u ON u.id = cp.user_id
             WHERE cp.conversation_id = ?1 AND cp.left_at IS NULL
             ORDER BY cp.joined_at, cp.user_id",
        )
        .store_err()?;

    stmt.query_map([conversation_id], |row| {
        Ok(Participant {
            conversation_id: row.get(0)?,
            user_id: uuid_col(row, 1)?,
            username: row.get(2)?,
            avatar: row.get(3)?,
            is_admin: row.get(4)?,
            joined_at: row.get(5)?,
            left_at: row.get(6)?,
            last_read_at: row.get(7)?,
        })
    })
    .store_err()?
    .collect::<Result<Vec<_>, _>>()
    .store_err()
}
