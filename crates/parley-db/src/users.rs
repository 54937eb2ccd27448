//! Mirrored identity rows. The identity subsystem owns users; we upsert a
//! summary row whenever a verified identity touches the chat core so foreign
//! keys and sender summaries resolve.

use rusqlite::Connection;
use uuid::Uuid;

use parley_types::error::ChatResult;
use parley_types::models::UserSummary;

use crate::rows::uuid_col;
use crate::{Database, OptionalExt, StoreExt};

impl Database {
    pub fn upsert_user(&self, id: Uuid, username: &str, avatar: Option<&str>) -> ChatResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, avatar) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     username = excluded.username,
                     avatar = COALESCE(excluded.avatar, users.avatar)",
                (id.to_string(), username, avatar),
            )
            .store_err()?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> ChatResult<Option<UserSummary>> {
        self.with_conn(|conn| query_user(conn, id))
    }
}

pub(crate) fn query_user(conn: &Connection, id: Uuid) -> ChatResult<Option<UserSummary>> {
    conn.query_row(
        "SELECT id, username, avatar FROM users WHERE id = ?1",
        [id.to_string()],
        |row| {
            Ok(UserSummary {
                user_id: uuid_col(row, 0)?,
                username: row.get(1)?,
                avatar: row.get(2)?,
            })
        },
    )
    .optional()
}

/// How many of `ids` exist, with duplicates counted once. Used by
/// conversation creation to validate participants inside its transaction.
pub(crate) fn count_existing_users(conn: &Connection, ids: &[Uuid]) -> rusqlite::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT COUNT(DISTINCT id) FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );
    let params: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let count: i64 = conn.query_row(
        &sql,
        rusqlite::params_from_iter(params.iter()),
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
