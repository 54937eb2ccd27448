//! Message store: authorized paginated reads and authorization-checked
//! writes. Soft-deleted rows are filtered on every read path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::error::{ChatError, ChatResult};
use parley_types::models::{
    Attachment, DeliveryStatus, Message, MessageDetail, MessageStatus, Page, UserSummary,
};

use crate::conversations::{participant_exists, query_conversation};
use crate::rows::{MESSAGE_COLS, message_from_row, uuid_col};
use crate::users::query_user;
use crate::{Database, OptionalExt, StoreExt};

/// Listing wider than this is clamped; callers page instead.
const MAX_PAGE_SIZE: u32 = 200;

impl Database {
    /// Paginated history for a conversation the caller participates in.
    /// Non-deleted messages ordered newest-first, message id as the
    /// tie-break so same-timestamp inserts paginate stably. `page` below 1
    /// is clamped to 1.
    pub fn list_messages(
        &self,
        conversation_id: i64,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> ChatResult<Page<MessageDetail>> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        self.with_conn(|conn| {
            if !participant_exists(conn, conversation_id, user_id).store_err()? {
                return Err(ChatError::Forbidden);
            }

            let total_items: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ?1 AND is_deleted = 0",
                    [conversation_id],
                    |row| row.get::<_, i64>(0),
                )
                .store_err()? as u64;

            let offset = (page as u64 - 1) * page_size as u64;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS}, u.username, u.avatar
                     FROM messages m
                     LEFT JOIN users u ON u.id = m.sender_id
                     WHERE m.conversation_id = ?1 AND m.is_deleted = 0
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?2 OFFSET ?3"
                ))
                .store_err()?;

            let rows = stmt
                .query_map(
                    (conversation_id, page_size as i64, offset as i64),
                    message_with_sender,
                )
                .store_err()?
                .collect::<Result<Vec<_>, _>>()
                .store_err()?;

            let items = hydrate(conn, rows)?;
            let total_pages = (total_items as u32).div_ceil(page_size);

            Ok(Page {
                items,
                current_page: page,
                page_size,
                total_items,
                total_pages,
            })
        })
    }

    /// The caller's own non-deleted messages, oldest first. No pagination;
    /// no authorization beyond the identity itself.
    pub fn list_messages_by_sender(&self, user_id: Uuid) -> ChatResult<Vec<MessageDetail>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MESSAGE_COLS}, u.username, u.avatar
                     FROM messages m
                     LEFT JOIN users u ON u.id = m.sender_id
                     WHERE m.sender_id = ?1 AND m.is_deleted = 0
                     ORDER BY m.created_at ASC, m.id ASC"
                ))
                .store_err()?;

            let rows = stmt
                .query_map([user_id.to_string()], message_with_sender)
                .store_err()?
                .collect::<Result<Vec<_>, _>>()
                .store_err()?;

            hydrate(conn, rows)
        })
    }

    /// Persists a message with a server-side timestamp, plus the sender's
    /// own `sent` status row, in one transaction. The sender must be an
    /// active participant; the read paths enforce membership and the write
    /// path matches them.
    pub fn create_message(
        &self,
        conversation_id: i64,
        sender_id: Uuid,
        content: &str,
        kind: &str,
    ) -> ChatResult<MessageDetail> {
        if conversation_id <= 0 {
            return Err(ChatError::InvalidArgument("conversation id must be positive"));
        }
        if content.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message content is required"));
        }
        if kind.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message kind is required"));
        }

        self.with_conn(|conn| {
            let tx = conn.transaction().store_err()?;

            if query_conversation(&tx, conversation_id)?.is_none() {
                return Err(ChatError::NotFound("conversation"));
            }
            if !participant_exists(&tx, conversation_id, sender_id).store_err()? {
                return Err(ChatError::Forbidden);
            }

            let now = Utc::now();
            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (conversation_id, sender_id.to_string(), content, kind, now),
            )
            .store_err()?;
            let message_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO message_statuses (message_id, user_id, status, status_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (
                    message_id,
                    sender_id.to_string(),
                    DeliveryStatus::Sent.as_str(),
                    now,
                ),
            )
            .store_err()?;

            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                (now, conversation_id),
            )
            .store_err()?;

            let sender = query_user(&tx, sender_id)?.ok_or(ChatError::NotFound("user"))?;

            tx.commit().store_err()?;

            Ok(MessageDetail {
                message: Message {
                    id: message_id,
                    conversation_id,
                    sender_id,
                    content: content.to_owned(),
                    kind: kind.to_owned(),
                    created_at: now,
                    modified_at: None,
                    is_deleted: false,
                },
                sender,
                attachments: Vec::new(),
                statuses: vec![MessageStatus {
                    message_id,
                    user_id: sender_id,
                    status: DeliveryStatus::Sent,
                    status_at: now,
                }],
            })
        })
    }

    /// Per-recipient delivery state; at most one row per (message, user),
    /// later writes supersede. The user must participate in the message's
    /// conversation.
    pub fn set_message_status(
        &self,
        message_id: i64,
        user_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.with_conn(|conn| {
            let conversation_id: i64 = conn
                .query_row(
                    "SELECT conversation_id FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(ChatError::NotFound("message"))?;

            if !participant_exists(conn, conversation_id, user_id).store_err()? {
                return Err(ChatError::Forbidden);
            }

            conn.execute(
                "INSERT INTO message_statuses (message_id, user_id, status, status_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id, user_id) DO UPDATE SET
                     status = excluded.status,
                     status_at = excluded.status_at",
                (message_id, user_id.to_string(), status.as_str(), at),
            )
            .store_err()?;
            Ok(())
        })
    }

    /// Marks a message deleted. Only the sender may do so; the row stays,
    /// every read path filters it.
    pub fn soft_delete_message(&self, message_id: i64, sender_id: Uuid) -> ChatResult<()> {
        self.with_conn(|conn| {
            let owner: Uuid = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1 AND is_deleted = 0",
                    [message_id],
                    |row| uuid_col(row, 0),
                )
                .optional()?
                .ok_or(ChatError::NotFound("message"))?;

            if owner != sender_id {
                return Err(ChatError::Forbidden);
            }

            conn.execute(
                "UPDATE messages SET is_deleted = 1, modified_at = ?1 WHERE id = ?2",
                (Utc::now(), message_id),
            )
            .store_err()?;
            Ok(())
        })
    }

    pub fn add_attachment(
        &self,
        message_id: i64,
        file_url: &str,
        file_name: Option<&str>,
        file_type: Option<&str>,
        file_size: i64,
    ) -> ChatResult<Attachment> {
        self.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
                    [message_id],
                    |row| row.get(0),
                )
                .store_err()?;
            if !exists {
                return Err(ChatError::NotFound("message"));
            }

            let now = Utc::now();
            conn.execute(
                "INSERT INTO attachments
                     (message_id, file_url, file_name, file_type, file_size, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (message_id, file_url, file_name, file_type, file_size, now),
            )
            .store_err()?;

            Ok(Attachment {
                id: conn.last_insert_rowid(),
                message_id,
                file_url: file_url.to_owned(),
                file_name: file_name.map(str::to_owned),
                file_type: file_type.map(str::to_owned),
                file_size,
                uploaded_at: now,
            })
        })
    }
}

fn message_with_sender(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Message, UserSummary)> {
    let message = message_from_row(row, 0)?;
    let username: Option<String> = row.get(8)?;
    let sender = UserSummary {
        user_id: message.sender_id,
        username: username.unwrap_or_else(|| "unknown".to_string()),
        avatar: row.get(9)?,
    };
    Ok((message, sender))
}

/// Batch-fetch attachments and statuses for the page in two IN-list queries
/// instead of per-message round trips.
fn hydrate(
    conn: &Connection,
    rows: Vec<(Message, UserSummary)>,
) -> ChatResult<Vec<MessageDetail>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = rows.iter().map(|(m, _)| m.id).collect();
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let in_list = placeholders.join(", ");

    let mut attachments: HashMap<i64, Vec<Attachment>> = HashMap::new();
    {
        let sql = format!(
            "SELECT id, message_id, file_url, file_name, file_type, file_size, uploaded_at
             FROM attachments WHERE message_id IN ({in_list})"
        );
        let mut stmt = conn.prepare(&sql).store_err()?;
        let fetched = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    file_url: row.get(2)?,
                    file_name: row.get(3)?,
                    file_type: row.get(4)?,
                    file_size: row.get(5)?,
                    uploaded_at: row.get(6)?,
                })
            })
            .store_err()?
            .collect::<Result<Vec<_>, _>>()
            .store_err()?;
        for attachment in fetched {
            attachments
                .entry(attachment.message_id)
                .or_default()
                .push(attachment);
        }
    }

    let mut statuses: HashMap<i64, Vec<MessageStatus>> = HashMap::new();
    {
        let sql = format!(
            "SELECT message_id, user_id, status, status_at
             FROM message_statuses WHERE message_id IN ({in_list})"
        );
        let mut stmt = conn.prepare(&sql).store_err()?;
        let fetched = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                let raw: String = row.get(2)?;
                let status = DeliveryStatus::parse(&raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        Type::Text,
                        format!("unknown delivery status: {raw}").into(),
                    )
                })?;
                Ok(MessageStatus {
                    message_id: row.get(0)?,
                    user_id: uuid_col(row, 1)?,
                    status,
                    status_at: row.get(3)?,
                })
            })
            .store_err()?
            .collect::<Result<Vec<_>, _>>()
            .store_err()?;
        for status in fetched {
            statuses.entry(status.message_id).or_default().push(status);
        }
    }

    Ok(rows
        .into_iter()
        .map(|(message, sender)| {
            let attachments = attachments.remove(&message.id).unwrap_or_default();
            let statuses = statuses.remove(&message.id).unwrap_or_default();
            MessageDetail {
                message,
                sender,
                attachments,
                statuses,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::ConversationKind;

    fn seed_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.upsert_user(id, name, None).unwrap();
        id
    }

    fn seed_conversation(db: &Database) -> (i64, Uuid, Uuid) {
        let ana = seed_user(db, "ana");
        let bo = seed_user(db, "bo");
        let conv = db
            .create_conversation(ana, &[bo], ConversationKind::Direct, None)
            .unwrap();
        (conv.id, ana, bo)
    }

    #[test]
    fn pagination_counts_and_oldest_tail() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, bo) = seed_conversation(&db);

        for i in 0..120 {
            let sender = if i % 2 == 0 { ana } else { bo };
            db.create_message(conv, sender, &format!("msg {i}"), "text")
                .unwrap();
        }

        let first = db.list_messages(conv, ana, 1, 50).unwrap();
        assert_eq!(first.items.len(), 50);
        assert_eq!(first.total_items, 120);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.current_page, 1);
        // Newest first.
        assert_eq!(first.items[0].message.content, "msg 119");

        let last = db.list_messages(conv, ana, 3, 50).unwrap();
        assert_eq!(last.items.len(), 20);
        assert_eq!(last.items.last().unwrap().message.content, "msg 0");
    }

    #[test]
    fn page_below_one_clamps_to_first() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, _) = seed_conversation(&db);
        db.create_message(conv, ana, "only", "text").unwrap();

        let page = db.list_messages(conv, ana, 0, 50).unwrap();
        assert_eq!(page.current_page, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn same_timestamp_inserts_never_straddle_pages_twice() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, _) = seed_conversation(&db);

        for i in 0..25 {
            db.create_message(conv, ana, &format!("m{i}"), "text").unwrap();
        }
        // Force identical creation timestamps; only the id tie-break keeps
        // the order total.
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET created_at = '2026-01-01T00:00:00+00:00'",
                [],
            )
            .store_err()?;
            Ok(())
        })
        .unwrap();

        let mut seen = std::collections::HashSet::new();
        for page in 1..=3 {
            let result = db.list_messages(conv, ana, page, 10).unwrap();
            for item in &result.items {
                assert!(seen.insert(item.message.id), "message on two pages");
            }
        }
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn deleted_messages_never_listed() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, bo) = seed_conversation(&db);

        let kept = db.create_message(conv, ana, "kept", "text").unwrap();
        let dropped = db.create_message(conv, ana, "dropped", "text").unwrap();
        db.soft_delete_message(dropped.message.id, ana).unwrap();

        let page = db.list_messages(conv, bo, 1, 50).unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].message.id, kept.message.id);

        let mine = db.list_messages_by_sender(ana).unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[test]
    fn listing_requires_membership() {
        let db = Database::open_in_memory().unwrap();
        let (conv, _, _) = seed_conversation(&db);
        let outsider = seed_user(&db, "carol");

        let err = db.list_messages(conv, outsider, 1, 50).unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));
    }

    #[test]
    fn create_message_validates_and_authorizes() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, _) = seed_conversation(&db);
        let outsider = seed_user(&db, "carol");

        assert!(matches!(
            db.create_message(0, ana, "hi", "text").unwrap_err(),
            ChatError::InvalidArgument(_)
        ));
        assert!(matches!(
            db.create_message(conv, ana, "  ", "text").unwrap_err(),
            ChatError::InvalidArgument(_)
        ));
        assert!(matches!(
            db.create_message(conv, ana, "hi", "").unwrap_err(),
            ChatError::InvalidArgument(_)
        ));
        assert!(matches!(
            db.create_message(9999, ana, "hi", "text").unwrap_err(),
            ChatError::NotFound("conversation")
        ));
        assert!(matches!(
            db.create_message(conv, outsider, "hi", "text").unwrap_err(),
            ChatError::Forbidden
        ));

        let detail = db.create_message(conv, ana, "hi", "text").unwrap();
        assert_eq!(detail.sender.username, "ana");
        assert_eq!(detail.statuses.len(), 1);
        assert_eq!(detail.statuses[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn later_status_writes_supersede() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, bo) = seed_conversation(&db);
        let msg = db.create_message(conv, ana, "hi", "text").unwrap();

        db.set_message_status(msg.message.id, bo, DeliveryStatus::Delivered, Utc::now())
            .unwrap();
        db.set_message_status(msg.message.id, bo, DeliveryStatus::Read, Utc::now())
            .unwrap();

        let page = db.list_messages(conv, ana, 1, 50).unwrap();
        let statuses = &page.items[0].statuses;
        // One row for the sender's `sent`, one superseded row for bo.
        assert_eq!(statuses.len(), 2);
        let bo_status = statuses.iter().find(|s| s.user_id == bo).unwrap();
        assert_eq!(bo_status.status, DeliveryStatus::Read);
    }

    #[test]
    fn status_writes_require_membership_and_message() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, _) = seed_conversation(&db);
        let outsider = seed_user(&db, "carol");
        let msg = db.create_message(conv, ana, "hi", "text").unwrap();

        assert!(matches!(
            db.set_message_status(9999, ana, DeliveryStatus::Read, Utc::now())
                .unwrap_err(),
            ChatError::NotFound("message")
        ));
        assert!(matches!(
            db.set_message_status(msg.message.id, outsider, DeliveryStatus::Read, Utc::now())
                .unwrap_err(),
            ChatError::Forbidden
        ));
    }

    #[test]
    fn only_the_sender_may_soft_delete() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, bo) = seed_conversation(&db);
        let msg = db.create_message(conv, ana, "hi", "text").unwrap();

        assert!(matches!(
            db.soft_delete_message(msg.message.id, bo).unwrap_err(),
            ChatError::Forbidden
        ));
        db.soft_delete_message(msg.message.id, ana).unwrap();
        // Already deleted: gone from the delete path's view as well.
        assert!(matches!(
            db.soft_delete_message(msg.message.id, ana).unwrap_err(),
            ChatError::NotFound("message")
        ));
    }

    #[test]
    fn attachments_ride_along_with_the_message() {
        let db = Database::open_in_memory().unwrap();
        let (conv, ana, bo) = seed_conversation(&db);
        let msg = db.create_message(conv, ana, "scan attached", "file").unwrap();

        db.add_attachment(
            msg.message.id,
            "https://files.example/xray.png",
            Some("xray.png"),
            Some("image/png"),
            48_213,
        )
        .unwrap();

        assert!(matches!(
            db.add_attachment(9999, "https://files.example/x", None, None, 0)
                .unwrap_err(),
            ChatError::NotFound("message")
        ));

        let page = db.list_messages(conv, bo, 1, 50).unwrap();
        let attachments = &page.items[0].attachments;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].file_name.as_deref(), Some("xray.png"));
    }
}
