//! Row-mapping helpers shared by the query modules.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::models::{Conversation, ConversationKind, Message};

/// User ids are stored as TEXT; a row that fails to parse is corrupt and
/// surfaces as a conversion failure, not a silent default.
pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn kind_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<ConversationKind> {
    let s: String = row.get(idx)?;
    ConversationKind::parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown conversation kind: {s}").into(),
        )
    })
}

/// Maps `id, kind, title, is_active, created_at, updated_at` starting at
/// column `base`.
pub(crate) fn conversation_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(base)?,
        kind: kind_col(row, base + 1)?,
        title: row.get(base + 2)?,
        is_active: row.get(base + 3)?,
        created_at: row.get::<_, DateTime<Utc>>(base + 4)?,
        updated_at: row.get(base + 5)?,
    })
}

/// Maps `id, conversation_id, sender_id, content, kind, created_at,
/// modified_at, is_deleted` starting at column `base`.
pub(crate) fn message_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(base)?,
        conversation_id: row.get(base + 1)?,
        sender_id: uuid_col(row, base + 2)?,
        content: row.get(base + 3)?,
        kind: row.get(base + 4)?,
        created_at: row.get::<_, DateTime<Utc>>(base + 5)?,
        modified_at: row.get(base + 6)?,
        is_deleted: row.get(base + 7)?,
    })
}

pub(crate) const MESSAGE_COLS: &str =
    "m.id, m.conversation_id, m.sender_id, m.content, m.kind, m.created_at, m.modified_at, m.is_deleted";
