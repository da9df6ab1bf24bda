use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{McpError, Result};
use crate::types::{BoundTool, ToolDefinition, ToolInvoker, ToolServer};

/// Registered tool servers plus a read-mostly discovery cache.
///
/// Registration rows live in SQLite behind a `Mutex<Connection>`; the
/// cache is a `DashMap` keyed by server id so concurrent turns on
/// different conversations never contend. The cache is never the source
/// of truth — a missing or expired entry just triggers a re-fetch.
pub struct ToolRegistry {
    db: Mutex<Connection>,
    invoker: Arc<dyn ToolInvoker>,
    cache: DashMap<String, CachedDiscovery>,
    cache_ttl_secs: i64,
}

#[derive(Clone)]
struct CachedDiscovery {
    tools: Vec<ToolDefinition>,
    fetched_at: DateTime<Utc>,
}

impl ToolRegistry {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, invoker: Arc<dyn ToolInvoker>, cache_ttl_secs: i64) -> Self {
        Self {
            db: Mutex::new(conn),
            invoker,
            cache: DashMap::new(),
            cache_ttl_secs,
        }
    }

    /// Register a new tool server for a user. Starts active.
    pub fn register(
        &self,
        name: &str,
        base_url: &str,
        owner_user_id: &str,
    ) -> Result<ToolServer> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tool_servers
             (id, name, base_url, active, owner_user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)",
            rusqlite::params![id, name, base_url, owner_user_id, now],
        )?;

        info!(server = name, %id, "tool server registered");
        Ok(ToolServer {
            id,
            name: name.to_string(),
            base_url: base_url.to_string(),
            active: true,
            owner_user_id: owner_user_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Flip the active flag. Deactivating also drops the cached discovery
    /// so a stale tool list can never be served for an inactive server.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE tool_servers SET active = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![active as i64, now, id],
        )?;
        drop(db);

        if changed == 0 {
            return Err(McpError::ServerNotFound { id: id.to_string() });
        }
        if !active {
            self.cache.remove(id);
        }
        Ok(())
    }

    /// Delete a registration and its cache entry.
    pub fn remove(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM tool_servers WHERE id = ?1",
            rusqlite::params![id],
        )?;
        drop(db);

        if changed == 0 {
            return Err(McpError::ServerNotFound { id: id.to_string() });
        }
        self.cache.remove(id);
        Ok(())
    }

    /// Retrieve a registration by id, `None` if it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<ToolServer>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, name, base_url, active, owner_user_id, created_at, updated_at
             FROM tool_servers WHERE id = ?1",
            rusqlite::params![id],
            row_to_server,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(McpError::Database(e)),
        }
    }

    /// All registrations for a user, newest first.
    pub fn list_for_user(&self, owner_user_id: &str) -> Result<Vec<ToolServer>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, name, base_url, active, owner_user_id, created_at, updated_at
             FROM tool_servers
             WHERE owner_user_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![owner_user_id], row_to_server)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Look up a server for an imminent `tools/call` and enforce the
    /// dispatch invariant: never against an inactive or unregistered server.
    pub fn server_for_call(&self, id: &str) -> Result<ToolServer> {
        let server = self
            .get(id)?
            .ok_or_else(|| McpError::ServerNotFound { id: id.to_string() })?;
        if !server.active {
            return Err(McpError::ServerInactive { id: id.to_string() });
        }
        Ok(server)
    }

    /// Aggregate tool list across the caller's active servers.
    ///
    /// Runs `tools/list` per active server with a short per-server timeout;
    /// a server that fails discovery is logged and excluded from this
    /// call's result, never fatal. Discovery results are cached per server
    /// until the TTL expires; `force_refresh` bypasses the cache.
    pub async fn list_active_tools(
        &self,
        owner_user_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<BoundTool>> {
        let servers: Vec<ToolServer> = self
            .list_for_user(owner_user_id)?
            .into_iter()
            .filter(|s| s.active)
            .collect();

        let mut bound = Vec::new();
        for server in servers {
            let tools = match self.tools_for_server(&server, force_refresh).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %server.name, error = %e, "discovery failed — excluding server for this call");
                    continue;
                }
            };
            for tool in tools {
                bound.push(BoundTool {
                    server_id: server.id.clone(),
                    server_name: server.name.clone(),
                    tool,
                });
            }
        }
        Ok(bound)
    }

    async fn tools_for_server(
        &self,
        server: &ToolServer,
        force_refresh: bool,
    ) -> Result<Vec<ToolDefinition>> {
        if !force_refresh {
            if let Some(cached) = self.get_cached(&server.id) {
                debug!(server = %server.name, "discovery cache hit");
                return Ok(cached.tools);
            }
        }

        let tools = self.invoker.discover(server).await?;
        self.cache.insert(
            server.id.clone(),
            CachedDiscovery {
                tools: tools.clone(),
                fetched_at: chrono::Utc::now(),
            },
        );
        Ok(tools)
    }

    fn get_cached(&self, server_id: &str) -> Option<CachedDiscovery> {
        let entry = self.cache.get(server_id)?;
        let age = chrono::Utc::now()
            .signed_duration_since(entry.fetched_at)
            .num_seconds();
        if age < self.cache_ttl_secs {
            Some(entry.clone())
        } else {
            None
        }
    }
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<ToolServer> {
    Ok(ToolServer {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        owner_user_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
