use std::str::FromStr;
use std::sync::Mutex;

use parley_core::types::MemoryStrategy;
use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{ConversationError, Result};
use crate::types::{Conversation, ConversationStatus};

/// Thread-safe manager for persisted conversations.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool, but a Mutex is sufficient for
/// a single-node gateway.
pub struct ConversationManager {
    db: Mutex<Connection>,
}

impl ConversationManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create a conversation. The memory strategy is fixed here for the
    /// conversation's lifetime.
    #[instrument(skip(self), fields(owner = %owner_user_id, strategy = %strategy))]
    pub fn create(
        &self,
        owner_user_id: &str,
        title: Option<&str>,
        strategy: MemoryStrategy,
    ) -> Result<Conversation> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (id, owner_user_id, title, status, memory_strategy, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?5)",
            rusqlite::params![id, owner_user_id, title, strategy.to_string(), now],
        )?;

        debug!(%id, "conversation created");
        Ok(Conversation {
            id,
            owner_user_id: owner_user_id.to_string(),
            title: title.map(String::from),
            status: ConversationStatus::Active,
            memory_strategy: strategy,
            message_count: 0,
            total_tokens: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Retrieve a conversation by id, returning `None` if it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, owner_user_id, title, status, memory_strategy,
                    message_count, total_tokens, created_at, updated_at
             FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            row_to_conversation,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConversationError::Database(e)),
        }
    }

    /// Like `get`, but requires the conversation to exist and be active —
    /// the precondition for accepting a turn.
    pub fn get_active(&self, id: &str) -> Result<Conversation> {
        let conversation = self
            .get(id)?
            .ok_or_else(|| ConversationError::NotFound { id: id.to_string() })?;
        if !conversation.is_active() {
            return Err(ConversationError::Closed { id: id.to_string() });
        }
        Ok(conversation)
    }

    /// List the most-recently-updated conversations for a user, newest first.
    pub fn list_for_user(&self, owner_user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, owner_user_id, title, status, memory_strategy,
                    message_count, total_tokens, created_at, updated_at
             FROM conversations
             WHERE owner_user_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![owner_user_id, limit as i64],
            row_to_conversation,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_for_user(&self, owner_user_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM conversations WHERE owner_user_id = ?1",
            rusqlite::params![owner_user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Close a conversation. Only the owner (or an admin) may close it.
    #[instrument(skip(self), fields(%id, user = %user_id))]
    pub fn close(&self, id: &str, user_id: &str, is_admin: bool) -> Result<()> {
        let conversation = self
            .get(id)?
            .ok_or_else(|| ConversationError::NotFound { id: id.to_string() })?;

        if conversation.owner_user_id != user_id && !is_admin {
            return Err(ConversationError::NotOwner {
                id: id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET status = 'closed', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    /// Record one completed exchange: +2 messages (user and assistant),
    /// token usage, and a bumped `updated_at` so listing order stays
    /// current.
    pub fn record_exchange(&self, id: &str, tokens: u64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversations
             SET message_count = message_count + 2,
                 total_tokens  = total_tokens + ?1,
                 updated_at    = ?2
             WHERE id = ?3",
            rusqlite::params![tokens as i64, now, id],
        )?;
        if changed == 0 {
            return Err(ConversationError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(3)?;
    let strategy_str: String = row.get(4)?;
    Ok(Conversation {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        title: row.get(2)?,
        status: ConversationStatus::from_str(&status_str).unwrap_or(ConversationStatus::Active),
        memory_strategy: MemoryStrategy::from_str(&strategy_str)
            .unwrap_or(MemoryStrategy::FullBuffer),
        message_count: row.get::<_, i64>(5)? as u32,
        total_tokens: row.get::<_, i64>(6)? as u64,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConversationManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ConversationManager::new(conn)
    }

    #[test]
    fn create_and_get_round_trip() {
        let mgr = manager();
        let created = mgr
            .create("u-1", Some("trip"), MemoryStrategy::RollingSummary)
            .unwrap();

        let fetched = mgr.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.owner_user_id, "u-1");
        assert_eq!(fetched.title.as_deref(), Some("trip"));
        assert_eq!(fetched.memory_strategy, MemoryStrategy::RollingSummary);
        assert!(fetched.is_active());
    }

    #[test]
    fn close_requires_ownership() {
        let mgr = manager();
        let conv = mgr.create("u-1", None, MemoryStrategy::FullBuffer).unwrap();

        assert!(matches!(
            mgr.close(&conv.id, "u-2", false),
            Err(ConversationError::NotOwner { .. })
        ));
        // Admins may close any conversation.
        mgr.close(&conv.id, "u-2", true).unwrap();
        assert!(matches!(
            mgr.get_active(&conv.id),
            Err(ConversationError::Closed { .. })
        ));
    }

    #[test]
    fn closed_conversation_rejects_turns() {
        let mgr = manager();
        let conv = mgr.create("u-1", None, MemoryStrategy::FullBuffer).unwrap();
        mgr.close(&conv.id, "u-1", false).unwrap();

        assert!(matches!(
            mgr.get_active(&conv.id),
            Err(ConversationError::Closed { .. })
        ));
        assert!(matches!(
            mgr.get_active("no-such-id"),
            Err(ConversationError::NotFound { .. })
        ));
    }

    #[test]
    fn record_exchange_accumulates_stats() {
        let mgr = manager();
        let conv = mgr.create("u-1", None, MemoryStrategy::FullBuffer).unwrap();

        mgr.record_exchange(&conv.id, 120).unwrap();
        mgr.record_exchange(&conv.id, 80).unwrap();

        let fetched = mgr.get(&conv.id).unwrap().unwrap();
        assert_eq!(fetched.message_count, 4);
        assert_eq!(fetched.total_tokens, 200);
    }

    #[test]
    fn list_is_scoped_and_counted_per_user() {
        let mgr = manager();
        mgr.create("u-1", None, MemoryStrategy::FullBuffer).unwrap();
        mgr.create("u-1", None, MemoryStrategy::None).unwrap();
        mgr.create("u-2", None, MemoryStrategy::FullBuffer).unwrap();

        assert_eq!(mgr.list_for_user("u-1", 10).unwrap().len(), 2);
        assert_eq!(mgr.count_for_user("u-1").unwrap(), 2);
        assert_eq!(mgr.count_for_user("u-2").unwrap(), 1);
    }
}
