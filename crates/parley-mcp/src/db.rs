use rusqlite::Connection;

use crate::error::Result;

/// Initialise the tool_servers table and its index.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_servers (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            base_url      TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            owner_user_id TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_servers_owner
            ON tool_servers(owner_user_id, active);",
    )?;
    Ok(())
}
