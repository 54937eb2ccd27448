pub mod conversations;
pub mod messages;
pub mod migrations;
mod rows;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use parley_types::error::{ChatError, ChatResult};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> ChatResult<Self> {
        let conn = Connection::open(path).store_err()?;
        Self::init(conn).inspect(|_| info!("Database opened at {}", path.display()))
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory().store_err()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> ChatResult<Self> {
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL").store_err()?;
        conn.pragma_update(None, "foreign_keys", "ON").store_err()?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::store(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

/// Extension for collapsing rusqlite errors into the store-failure kind.
pub(crate) trait StoreExt<T> {
    fn store_err(self) -> ChatResult<T>;
}

impl<T> StoreExt<T> for std::result::Result<T, rusqlite::Error> {
    fn store_err(self) -> ChatResult<T> {
        self.map_err(ChatError::store)
    }
}

/// Extension for optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> ChatResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> ChatResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ChatError::store(e)),
        }
    }
}
