//! SQLite pool construction for the job and draft-task tables.

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

/// Writers wait this long on a held write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the database at `db.path`.
///
/// WAL mode with a busy timeout: concurrent segment units all write
/// progress to the same `jobs` row and event log, so a writer must wait
/// for a sibling's lock rather than erroring out.
pub async fn connect(config: &crate::config::Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}
