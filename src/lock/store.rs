use super::{LockEvent, LockRecord};
use crate::{HubError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Embedded storage for one resource lock: at most one current row plus an
/// append-only event history.
pub struct LockStore {
    conn: Connection,
}

fn ts(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HubError::Internal(anyhow::anyhow!("bad timestamp {value}: {e}")))
}

impl LockStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS current_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                resource_path TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                locked_by TEXT NOT NULL,
                reason TEXT,
                locked_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lock_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                reason TEXT,
                timestamp TEXT NOT NULL,
                expires_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_lock_history_timestamp ON lock_history(timestamp);
            "#,
        )?;
        Ok(())
    }

    pub fn current(&self) -> Result<Option<LockRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT resource_path, resource_type, locked_by, reason, locked_at, expires_at \
                 FROM current_lock WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((resource_path, resource_type, locked_by, reason, locked_at, expires_at)) => {
                Ok(Some(LockRecord {
                    resource_path,
                    resource_type,
                    locked_by,
                    reason,
                    locked_at: ts(locked_at)?,
                    expires_at: ts(expires_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn set_current(&self, record: &LockRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO current_lock (id, resource_path, resource_type, locked_by, reason,
                                      locked_at, expires_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                resource_path = ?1, resource_type = ?2, locked_by = ?3, reason = ?4,
                locked_at = ?5, expires_at = ?6
            "#,
            params![
                &record.resource_path,
                &record.resource_type,
                &record.locked_by,
                &record.reason,
                record.locked_at.to_rfc3339(),
                record.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn clear_current(&self) -> Result<()> {
        self.conn.execute("DELETE FROM current_lock WHERE id = 1", [])?;
        Ok(())
    }

    pub fn append_event(&self, event: &LockEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO lock_history (action, agent_id, reason, timestamp, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                &event.action,
                &event.agent_id,
                &event.reason,
                event.timestamp.to_rfc3339(),
                event.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Most recent events first.
    pub fn history(&self, limit: usize) -> Result<Vec<LockEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT action, agent_id, reason, timestamp, expires_at FROM lock_history \
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(LockEvent {
                action: row.get(0)?,
                agent_id: row.get(1)?,
                reason: row.get(2)?,
                timestamp: ts(row.get(3)?)?,
                expires_at: row
                    .get::<_, Option<String>>(4)?
                    .map(ts)
                    .transpose()?,
            });
        }
        Ok(events)
    }
}
