pub mod connection;
pub mod error;
pub mod presence;
pub mod registry;
pub mod router;
pub mod service;

use std::sync::Arc;

use anyhow::anyhow;
use murmur_db::Database;

pub use error::{ChatError, Result};
pub use registry::{ConnectionHandle, Registry};
pub use service::ChatService;

/// Run blocking SQLite work off the async runtime.
pub async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}
