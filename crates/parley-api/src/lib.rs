pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use parley_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}
