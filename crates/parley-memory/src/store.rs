use std::str::FromStr;
use std::sync::Mutex;

use parley_core::types::Role;
use rusqlite::Connection;

use crate::error::{MemoryError, Result};
use crate::types::{NewMessage, StoredMessage};

/// Persistence collaborator contract for messages.
///
/// The cache in `MemoryManager` is rebuilt from this store whenever an
/// entry is missing — the store is the single source of truth.
pub trait MessageStore: Send + Sync {
    fn append_message(&self, conversation_id: &str, msg: NewMessage) -> Result<StoredMessage>;

    /// Full ordered history, oldest first. Ties on `created_at` break by
    /// insertion sequence (rowid).
    fn load_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

/// Default store backed by SQLite.
pub struct SqliteMessageStore {
    db: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }
}

impl MessageStore for SqliteMessageStore {
    fn append_message(&self, conversation_id: &str, msg: NewMessage) -> Result<StoredMessage> {
        let now = chrono::Utc::now().to_rfc3339();
        let tool_call_json = msg
            .tool_call
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (conversation_id, role, content, tokens, tool_call, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                conversation_id,
                msg.role.to_string(),
                msg.content,
                msg.tokens,
                tool_call_json,
                now,
            ],
        )?;
        let id = db.last_insert_rowid();

        Ok(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role: msg.role,
            content: msg.content,
            tokens: msg.tokens,
            tool_call: msg.tool_call,
            created_at: now,
        })
    }

    fn load_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, tokens, tool_call, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(MemoryError::Database)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(2)?;
    let tool_call_json: Option<String> = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        content: row.get(3)?,
        tokens: row.get(4)?,
        tool_call: tool_call_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteMessageStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SqliteMessageStore::new(conn)
    }

    #[test]
    fn history_preserves_append_order() {
        let store = store();
        for i in 0..5 {
            store
                .append_message("c-1", NewMessage::user(format!("msg {i}")))
                .unwrap();
        }

        let history = store.load_history("c-1").unwrap();
        assert_eq!(history.len(), 5);
        for (i, msg) in history.iter().enumerate() {
            assert_eq!(msg.content, format!("msg {i}"));
        }
    }

    #[test]
    fn tool_call_metadata_round_trips() {
        let store = store();
        let mut msg = NewMessage::assistant("done", Some(12));
        msg.tool_call = Some(serde_json::json!({ "name": "get_time", "outcome": "success" }));
        store.append_message("c-1", msg).unwrap();

        let history = store.load_history("c-1").unwrap();
        let meta = history[0].tool_call.as_ref().unwrap();
        assert_eq!(meta["name"], "get_time");
        assert_eq!(history[0].tokens, Some(12));
    }

    #[test]
    fn histories_are_scoped_per_conversation() {
        let store = store();
        store.append_message("c-1", NewMessage::user("one")).unwrap();
        store.append_message("c-2", NewMessage::user("two")).unwrap();

        assert_eq!(store.load_history("c-1").unwrap().len(), 1);
        assert_eq!(store.load_history("c-2").unwrap().len(), 1);
        assert!(store.load_history("c-3").unwrap().is_empty());
    }
}
