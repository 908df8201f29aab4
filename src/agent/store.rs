use super::models::{
    Checkpoint, ContributionType, DirectMessage, Escalation, EscalationTrigger, Heartbeat,
    MemoryEntry, ResolvedBy, ShadowMonitor, Soul, StepOutcome, TraceSummary, WorkStep, WorkTrace,
};
use crate::{constants, HubError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;

/// Embedded storage for one agent's state singleton.
///
/// Multi-row entities (messages, memory, traces, steps, escalations,
/// heartbeats) get real columns and the indexes the query paths need; the
/// three singleton rows (checkpoint, soul, shadow monitor) are stored as
/// JSON documents since they are always read and written whole.
pub struct AgentStore {
    conn: Connection,
}

fn ts(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HubError::Internal(anyhow::anyhow!("bad timestamp {value}: {e}")))
}

fn opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(ts).transpose()
}

impl AgentStore {
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
            CREATE TABLE IF NOT EXISTS checkpoint (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS soul (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS shadow_monitor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                message_type TEXT NOT NULL,
                message TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memory (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS traces (
                session_id TEXT PRIMARY KEY,
                task TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS work_steps (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool TEXT NOT NULL,
                intent TEXT NOT NULL,
                outcome TEXT NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                contribution_type TEXT,
                knowledge_gained TEXT NOT NULL DEFAULT '[]',
                eliminated_paths TEXT NOT NULL DEFAULT '[]',
                depends_on TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY (session_id) REFERENCES traces(session_id)
            );

            CREATE TABLE IF NOT EXISTS escalations (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                triggered_at TEXT NOT NULL,
                triggers TEXT NOT NULL DEFAULT '[]',
                highest_level INTEGER NOT NULL,
                resolved_at TEXT,
                resolved_by TEXT,
                resolver_agent TEXT,
                helpful_hint TEXT,
                FOREIGN KEY (session_id) REFERENCES traces(session_id)
            );

            CREATE TABLE IF NOT EXISTS heartbeats (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                tokens_used INTEGER,
                current_task TEXT,
                status TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
            CREATE INDEX IF NOT EXISTS idx_memory_category ON memory(category);
            CREATE INDEX IF NOT EXISTS idx_steps_session ON work_steps(session_id);
            CREATE INDEX IF NOT EXISTS idx_escalations_session ON escalations(session_id);
            CREATE INDEX IF NOT EXISTS idx_escalations_open
                ON escalations(session_id) WHERE resolved_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_heartbeats_timestamp ON heartbeats(timestamp);
            "#,
        )?;
        Ok(())
    }

    // ----- singleton documents -----

    fn get_doc<T: serde::de::DeserializeOwned>(&self, table: &str) -> Result<Option<T>> {
        let sql = format!("SELECT data FROM {table} WHERE id = 1");
        let raw: Option<String> = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put_doc<T: serde::Serialize>(&self, table: &str, value: &T) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} (id, data) VALUES (1, ?1) \
             ON CONFLICT(id) DO UPDATE SET data = ?1"
        );
        self.conn.execute(&sql, params![serde_json::to_string(value)?])?;
        Ok(())
    }

    pub fn checkpoint(&self) -> Result<Checkpoint> {
        Ok(self.get_doc("checkpoint")?.unwrap_or_default())
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.put_doc("checkpoint", checkpoint)
    }

    pub fn soul(&self) -> Result<Option<Soul>> {
        self.get_doc("soul")
    }

    pub fn put_soul(&self, soul: &Soul) -> Result<()> {
        self.put_doc("soul", soul)
    }

    pub fn shadow(&self) -> Result<ShadowMonitor> {
        Ok(self.get_doc("shadow_monitor")?.unwrap_or_default())
    }

    pub fn put_shadow(&self, monitor: &ShadowMonitor) -> Result<()> {
        self.put_doc("shadow_monitor", monitor)
    }

    // ----- direct messages -----

    fn message_from_row(row: &Row<'_>) -> Result<DirectMessage> {
        Ok(DirectMessage {
            id: row.get(0)?,
            from: row.get(1)?,
            message_type: row.get(2)?,
            message: row.get(3)?,
            read: row.get::<_, i64>(4)? != 0,
            timestamp: ts(row.get(5)?)?,
        })
    }

    pub fn insert_message(&self, msg: &DirectMessage) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO messages (id, sender, message_type, message, read, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                &msg.id,
                &msg.from,
                &msg.message_type,
                &msg.message,
                msg.read as i64,
                msg.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_messages(&self, unread_only: bool) -> Result<Vec<DirectMessage>> {
        let sql = if unread_only {
            "SELECT id, sender, message_type, message, read, timestamp FROM messages \
             WHERE read = 0 ORDER BY timestamp"
        } else {
            "SELECT id, sender, message_type, message, read, timestamp FROM messages \
             ORDER BY timestamp"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::message_from_row(row)?);
        }
        Ok(messages)
    }

    pub fn mark_messages_read(&self, ids: &[String]) -> Result<usize> {
        let mut marked = 0;
        for id in ids {
            marked += self
                .conn
                .execute("UPDATE messages SET read = 1 WHERE id = ?1", [id])?;
        }
        Ok(marked)
    }

    pub fn unread_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages WHERE read = 0", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    // ----- memory -----

    pub fn insert_memory(&self, entry: &MemoryEntry) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO memory (id, category, content, tags, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                &entry.id,
                &entry.category,
                &entry.content,
                serde_json::to_string(&entry.tags)?,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Category and free-text filter (substring over content and tags),
    /// most recent entries first, capped.
    pub fn search_memory(
        &self,
        category: Option<&str>,
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category, content, tags, created_at FROM memory \
             ORDER BY created_at DESC",
        )?;
        let mut rows = stmt.query([])?;
        let needle = query.map(|q| q.to_lowercase());
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let entry = MemoryEntry {
                id: row.get(0)?,
                category: row.get(1)?,
                content: row.get(2)?,
                tags: serde_json::from_str(&row.get::<_, String>(3)?)?,
                created_at: ts(row.get(4)?)?,
            };
            if let Some(c) = category {
                if entry.category != c {
                    continue;
                }
            }
            if let Some(q) = &needle {
                let in_content = entry.content.to_lowercase().contains(q);
                let in_tags = entry.tags.iter().any(|t| t.to_lowercase().contains(q));
                if !in_content && !in_tags {
                    continue;
                }
            }
            entries.push(entry);
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    // ----- work traces -----

    pub fn insert_trace(&self, trace: &WorkTrace) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO traces (session_id, task, started_at, completed_at, summary)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                &trace.session_id,
                &trace.task,
                trace.started_at.to_rfc3339(),
                trace.completed_at.map(|t| t.to_rfc3339()),
                trace
                    .summary
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        Ok(())
    }

    pub fn trace_exists(&self, session_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM traces WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn steps_for(&self, session_id: &str) -> Result<Vec<WorkStep>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, tool, intent, outcome, duration_ms, contribution_type, \
             knowledge_gained, eliminated_paths, depends_on \
             FROM work_steps WHERE session_id = ?1 ORDER BY timestamp, id",
        )?;
        let mut rows = stmt.query([session_id])?;
        let mut steps = Vec::new();
        while let Some(row) = rows.next()? {
            steps.push(WorkStep {
                id: row.get(0)?,
                timestamp: ts(row.get(1)?)?,
                tool: row.get(2)?,
                intent: row.get(3)?,
                outcome: StepOutcome::from_str(&row.get::<_, String>(4)?)
                    .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
                duration_ms: row.get(5)?,
                contribution_type: row
                    .get::<_, Option<String>>(6)?
                    .map(|s| ContributionType::from_str(&s))
                    .transpose()
                    .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
                knowledge_gained: serde_json::from_str(&row.get::<_, String>(7)?)?,
                eliminated_paths: serde_json::from_str(&row.get::<_, String>(8)?)?,
                depends_on: serde_json::from_str(&row.get::<_, String>(9)?)?,
            });
        }
        Ok(steps)
    }

    fn trace_from_row(&self, row: &Row<'_>) -> Result<WorkTrace> {
        let session_id: String = row.get(0)?;
        let summary: Option<String> = row.get(4)?;
        Ok(WorkTrace {
            steps: self.steps_for(&session_id)?,
            session_id,
            task: row.get(1)?,
            started_at: ts(row.get(2)?)?,
            completed_at: opt_ts(row.get(3)?)?,
            summary: summary.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }

    pub fn get_trace(&self, session_id: &str) -> Result<Option<WorkTrace>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, task, started_at, completed_at, summary \
             FROM traces WHERE session_id = ?1",
        )?;
        let row = stmt
            .query_row([session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .optional()?;
        match row {
            Some((session_id, task, started_at, completed_at, summary)) => Ok(Some(WorkTrace {
                steps: self.steps_for(&session_id)?,
                session_id,
                task,
                started_at: ts(started_at)?,
                completed_at: opt_ts(completed_at)?,
                summary: summary.map(|s| serde_json::from_str(&s)).transpose()?,
            })),
            None => Ok(None),
        }
    }

    /// Traces newest first, steps included.
    pub fn list_traces(&self, limit: usize) -> Result<Vec<WorkTrace>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, task, started_at, completed_at, summary \
             FROM traces ORDER BY started_at DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut traces = Vec::new();
        while let Some(row) = rows.next()? {
            traces.push(self.trace_from_row(row)?);
        }
        Ok(traces)
    }

    pub fn open_traces(&self) -> Result<Vec<WorkTrace>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, task, started_at, completed_at, summary \
             FROM traces WHERE completed_at IS NULL ORDER BY started_at DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut traces = Vec::new();
        while let Some(row) = rows.next()? {
            traces.push(self.trace_from_row(row)?);
        }
        Ok(traces)
    }

    pub fn insert_step(&self, session_id: &str, step: &WorkStep) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO work_steps (id, session_id, timestamp, tool, intent, outcome,
                                    duration_ms, contribution_type, knowledge_gained,
                                    eliminated_paths, depends_on)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                &step.id,
                session_id,
                step.timestamp.to_rfc3339(),
                &step.tool,
                &step.intent,
                step.outcome.to_string(),
                step.duration_ms,
                step.contribution_type.map(|c| c.to_string()),
                serde_json::to_string(&step.knowledge_gained)?,
                serde_json::to_string(&step.eliminated_paths)?,
                serde_json::to_string(&step.depends_on)?,
            ],
        )?;
        Ok(())
    }

    pub fn complete_trace(
        &self,
        session_id: &str,
        completed_at: DateTime<Utc>,
        summary: &TraceSummary,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE traces SET completed_at = ?2, summary = ?3 WHERE session_id = ?1",
            params![
                session_id,
                completed_at.to_rfc3339(),
                serde_json::to_string(summary)?,
            ],
        )?;
        Ok(())
    }

    pub fn last_completed_trace_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT completed_at FROM traces WHERE completed_at IS NOT NULL \
                 ORDER BY completed_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        opt_ts(raw)
    }

    // ----- escalations -----

    fn escalation_from_row(row: &Row<'_>) -> Result<Escalation> {
        let triggers: Vec<EscalationTrigger> =
            serde_json::from_str(&row.get::<_, String>(3)?)?;
        Ok(Escalation {
            id: row.get(0)?,
            session_id: row.get(1)?,
            triggered_at: ts(row.get(2)?)?,
            triggers,
            highest_level: row.get::<_, i64>(4)? as u8,
            resolved_at: opt_ts(row.get(5)?)?,
            resolved_by: row
                .get::<_, Option<String>>(6)?
                .map(|s| ResolvedBy::from_str(&s))
                .transpose()
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            resolver_agent: row.get(7)?,
            helpful_hint: row.get(8)?,
        })
    }

    const ESCALATION_COLUMNS: &'static str = "id, session_id, triggered_at, triggers, \
         highest_level, resolved_at, resolved_by, resolver_agent, helpful_hint";

    pub fn insert_escalation(&self, escalation: &Escalation) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO escalations (id, session_id, triggered_at, triggers, highest_level,
                                     resolved_at, resolved_by, resolver_agent, helpful_hint)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                &escalation.id,
                &escalation.session_id,
                escalation.triggered_at.to_rfc3339(),
                serde_json::to_string(&escalation.triggers)?,
                escalation.highest_level as i64,
                escalation.resolved_at.map(|t| t.to_rfc3339()),
                escalation.resolved_by.map(|r| r.to_string()),
                &escalation.resolver_agent,
                &escalation.helpful_hint,
            ],
        )?;
        Ok(())
    }

    pub fn list_escalations(&self, session_id: &str) -> Result<Vec<Escalation>> {
        let sql = format!(
            "SELECT {} FROM escalations WHERE session_id = ?1 ORDER BY triggered_at",
            Self::ESCALATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([session_id])?;
        let mut escalations = Vec::new();
        while let Some(row) = rows.next()? {
            escalations.push(Self::escalation_from_row(row)?);
        }
        Ok(escalations)
    }

    pub fn unresolved_escalations(&self) -> Result<Vec<Escalation>> {
        let sql = format!(
            "SELECT {} FROM escalations WHERE resolved_at IS NULL ORDER BY triggered_at",
            Self::ESCALATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut escalations = Vec::new();
        while let Some(row) = rows.next()? {
            escalations.push(Self::escalation_from_row(row)?);
        }
        Ok(escalations)
    }

    pub fn latest_unresolved_escalation(&self, session_id: &str) -> Result<Option<Escalation>> {
        let sql = format!(
            "SELECT {} FROM escalations WHERE session_id = ?1 AND resolved_at IS NULL \
             ORDER BY triggered_at DESC LIMIT 1",
            Self::ESCALATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([session_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::escalation_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn get_escalation(&self, id: &str) -> Result<Option<Escalation>> {
        let sql = format!(
            "SELECT {} FROM escalations WHERE id = ?1",
            Self::ESCALATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::escalation_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn update_escalation(&self, escalation: &Escalation) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE escalations SET resolved_at = ?2, resolved_by = ?3, resolver_agent = ?4,
                                   helpful_hint = ?5
            WHERE id = ?1
            "#,
            params![
                &escalation.id,
                escalation.resolved_at.map(|t| t.to_rfc3339()),
                escalation.resolved_by.map(|r| r.to_string()),
                &escalation.resolver_agent,
                &escalation.helpful_hint,
            ],
        )?;
        Ok(())
    }

    // ----- heartbeats -----

    pub fn insert_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO heartbeats (timestamp, tokens_used, current_task, status)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                heartbeat.timestamp.to_rfc3339(),
                heartbeat.tokens_used,
                heartbeat.current_task,
                heartbeat.status,
            ],
        )?;

        // Keep only the most recent entries of the ring
        self.conn.execute(
            r#"
            DELETE FROM heartbeats WHERE seq IN (
                SELECT seq FROM heartbeats ORDER BY seq DESC LIMIT -1 OFFSET ?1
            )
            "#,
            params![constants::HEARTBEAT_RING_SIZE as i64],
        )?;
        Ok(())
    }

    pub fn list_heartbeats(&self, limit: usize) -> Result<Vec<Heartbeat>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, tokens_used, current_task, status FROM heartbeats \
             ORDER BY seq DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut beats = Vec::new();
        while let Some(row) = rows.next()? {
            beats.push(Heartbeat {
                timestamp: ts(row.get(0)?)?,
                tokens_used: row.get(1)?,
                current_task: row.get(2)?,
                status: row.get(3)?,
            });
        }
        beats.reverse();
        Ok(beats)
    }

    pub fn heartbeat_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM heartbeats", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::StepInput;

    fn step(tool: &str, outcome: StepOutcome) -> WorkStep {
        WorkStep::from_input(StepInput {
            tool: tool.to_string(),
            intent: "look around".to_string(),
            outcome,
            duration_ms: 100,
            contribution_type: None,
            knowledge_gained: vec![],
            eliminated_paths: vec![],
            depends_on: vec![],
        })
    }

    #[test]
    fn checkpoint_defaults_to_empty() {
        let store = AgentStore::open_in_memory().unwrap();
        let checkpoint = store.checkpoint().unwrap();
        assert!(checkpoint.conversation_summary.is_none());
        assert!(checkpoint.pending_work.is_empty());
    }

    #[test]
    fn trace_round_trips_with_steps() {
        let store = AgentStore::open_in_memory().unwrap();
        let trace = WorkTrace {
            session_id: "s1".to_string(),
            task: "find the bug".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: vec![],
            summary: None,
        };
        store.insert_trace(&trace).unwrap();
        store.insert_step("s1", &step("grep", StepOutcome::Nothing)).unwrap();
        store.insert_step("s1", &step("read", StepOutcome::Found)).unwrap();

        let loaded = store.get_trace("s1").unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.task, "find the bug");
        assert!(loaded.completed_at.is_none());
    }

    #[test]
    fn heartbeat_ring_is_bounded() {
        let store = AgentStore::open_in_memory().unwrap();
        for i in 0..(constants::HEARTBEAT_RING_SIZE + 20) {
            store
                .insert_heartbeat(&Heartbeat {
                    timestamp: Utc::now(),
                    tokens_used: Some(i as i64),
                    current_task: None,
                    status: Some("working".to_string()),
                })
                .unwrap();
        }
        assert_eq!(
            store.heartbeat_count().unwrap(),
            constants::HEARTBEAT_RING_SIZE
        );
    }

    #[test]
    fn memory_search_matches_content_and_tags() {
        let store = AgentStore::open_in_memory().unwrap();
        store
            .insert_memory(&MemoryEntry::new(
                "architecture",
                "the parser lives in src/parse.rs",
                vec!["parser".to_string()],
            ))
            .unwrap();
        store
            .insert_memory(&MemoryEntry::new(
                "process",
                "deploys happen on fridays",
                vec![],
            ))
            .unwrap();

        let hits = store.search_memory(None, Some("parser"), 50).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store.search_memory(Some("process"), None, 50).unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store
            .search_memory(Some("architecture"), Some("fridays"), 50)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn unresolved_escalations_filter() {
        let store = AgentStore::open_in_memory().unwrap();
        let trace = WorkTrace {
            session_id: "s1".to_string(),
            task: "t".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            steps: vec![],
            summary: None,
        };
        store.insert_trace(&trace).unwrap();

        let mut resolved = Escalation::new("s1", vec![]);
        resolved.resolved_at = Some(Utc::now());
        resolved.resolved_by = Some(ResolvedBy::SelfResolved);
        store.insert_escalation(&resolved).unwrap();
        store.update_escalation(&resolved).unwrap();

        let open = Escalation::new("s1", vec![]);
        store.insert_escalation(&open).unwrap();

        let unresolved = store.unresolved_escalations().unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, open.id);
    }
}
