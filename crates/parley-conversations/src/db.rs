use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversations table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            owner_user_id   TEXT NOT NULL,
            title           TEXT,
            status          TEXT NOT NULL DEFAULT 'active',
            memory_strategy TEXT NOT NULL DEFAULT 'full-buffer',
            message_count   INTEGER NOT NULL DEFAULT 0,
            total_tokens    INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_owner
            ON conversations(owner_user_id, updated_at DESC);",
    )?;
    Ok(())
}
