use super::models::{
    AgentRecord, AgentStatus, AuthorType, ChatMessage, Claim, Handoff, HandoffStatus, Task,
    TaskPriority, TaskStatus, Zone,
};
use crate::{HubError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;

/// Embedded storage for the Coordinator singleton.
///
/// One database, one logical writer. List-valued columns are stored as JSON
/// text; timestamps as RFC3339 text so lexical order is chronological order.
pub struct CoordinatorStore {
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

fn json_list(value: String) -> Result<Vec<String>> {
    Ok(serde_json::from_str(&value)?)
}

impl CoordinatorStore {
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
            CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                current_task TEXT,
                working_on TEXT,
                last_seen TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '[]',
                offers TEXT NOT NULL DEFAULT '[]',
                needs TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                author TEXT NOT NULL,
                author_type TEXT NOT NULL,
                message TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                reactions TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                assignee TEXT,
                created_by TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                files TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                picked_up_at TEXT,
                completed_at TEXT,
                blocked_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS zones (
                zone_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                owner TEXT NOT NULL,
                description TEXT,
                claimed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS claims (
                what TEXT PRIMARY KEY,
                claimed_by TEXT NOT NULL,
                description TEXT,
                since TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS handoffs (
                id TEXT PRIMARY KEY,
                from_agent TEXT NOT NULL,
                to_agent TEXT,
                title TEXT NOT NULL,
                context TEXT NOT NULL,
                code TEXT,
                file_path TEXT,
                next_steps TEXT NOT NULL DEFAULT '[]',
                priority TEXT NOT NULL,
                status TEXT NOT NULL,
                claimed_by TEXT,
                created_at TEXT NOT NULL,
                claimed_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
            CREATE INDEX IF NOT EXISTS idx_chat_timestamp ON chat_messages(timestamp);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee);
            CREATE INDEX IF NOT EXISTS idx_zones_owner ON zones(owner);
            CREATE INDEX IF NOT EXISTS idx_zones_path ON zones(path);
            CREATE INDEX IF NOT EXISTS idx_claims_by ON claims(claimed_by);
            CREATE INDEX IF NOT EXISTS idx_handoffs_status ON handoffs(status);
            CREATE INDEX IF NOT EXISTS idx_handoffs_to_agent ON handoffs(to_agent);
            "#,
        )?;

        Ok(())
    }

    // ----- agents -----

    fn agent_from_row(row: &Row<'_>) -> Result<AgentRecord> {
        Ok(AgentRecord {
            agent_id: row.get(0)?,
            status: AgentStatus::from_str(&row.get::<_, String>(1)?)
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            current_task: row.get(2)?,
            working_on: row.get(3)?,
            last_seen: ts(row.get(4)?)?,
            capabilities: json_list(row.get(5)?)?,
            offers: json_list(row.get(6)?)?,
            needs: json_list(row.get(7)?)?,
        })
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT agent_id, status, current_task, working_on, last_seen,
                   capabilities, offers, needs
            FROM agents WHERE agent_id = ?1
            "#,
        )?;
        let mut rows = stmt.query([agent_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::agent_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn put_agent(&self, agent: &AgentRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO agents (agent_id, status, current_task, working_on, last_seen,
                                capabilities, offers, needs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(agent_id) DO UPDATE SET
                status = ?2,
                current_task = ?3,
                working_on = ?4,
                last_seen = ?5,
                capabilities = ?6,
                offers = ?7,
                needs = ?8
            "#,
            params![
                &agent.agent_id,
                agent.status.to_string(),
                &agent.current_task,
                &agent.working_on,
                agent.last_seen.to_rfc3339(),
                serde_json::to_string(&agent.capabilities)?,
                serde_json::to_string(&agent.offers)?,
                serde_json::to_string(&agent.needs)?,
            ],
        )?;
        Ok(())
    }

    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT agent_id, status, current_task, working_on, last_seen,
                   capabilities, offers, needs
            FROM agents ORDER BY agent_id
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut agents = Vec::new();
        while let Some(row) = rows.next()? {
            agents.push(Self::agent_from_row(row)?);
        }
        Ok(agents)
    }

    // ----- chat -----

    pub fn append_chat(&self, msg: &ChatMessage, retention: usize) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO chat_messages (id, author, author_type, message, timestamp, reactions)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                &msg.id,
                &msg.author,
                msg.author_type.to_string(),
                &msg.message,
                msg.timestamp.to_rfc3339(),
                serde_json::to_string(&msg.reactions)?,
            ],
        )?;

        // Retention trim happens inside the same write so readers never see
        // the table above its cap.
        self.conn.execute(
            r#"
            DELETE FROM chat_messages WHERE id IN (
                SELECT id FROM chat_messages
                ORDER BY timestamp DESC, id DESC
                LIMIT -1 OFFSET ?1
            )
            "#,
            params![retention as i64],
        )?;
        Ok(())
    }

    fn chat_from_row(row: &Row<'_>) -> Result<ChatMessage> {
        Ok(ChatMessage {
            id: row.get(0)?,
            author: row.get(1)?,
            author_type: AuthorType::from_str(&row.get::<_, String>(2)?)
                .unwrap_or(AuthorType::System),
            message: row.get(3)?,
            timestamp: ts(row.get(4)?)?,
            reactions: json_list(row.get(5)?)?,
        })
    }

    /// Most recent `limit` messages, returned in chronological order.
    pub fn recent_chat(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, author, author_type, message, timestamp, reactions
            FROM chat_messages
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::chat_from_row(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn add_reaction(&self, message_id: &str, entry: &str) -> Result<ChatMessage> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, author, author_type, message, timestamp, reactions
            FROM chat_messages WHERE id = ?1
            "#,
        )?;
        let mut rows = stmt.query([message_id])?;
        let mut msg = match rows.next()? {
            Some(row) => Self::chat_from_row(row)?,
            None => {
                return Err(HubError::NotFound(format!(
                    "chat message {message_id} not found"
                )))
            }
        };
        drop(rows);
        drop(stmt);

        if !msg.reactions.iter().any(|r| r == entry) {
            msg.reactions.push(entry.to_string());
            self.conn.execute(
                "UPDATE chat_messages SET reactions = ?2 WHERE id = ?1",
                params![message_id, serde_json::to_string(&msg.reactions)?],
            )?;
        }
        Ok(msg)
    }

    // ----- tasks -----

    fn task_from_row(row: &Row<'_>) -> Result<Task> {
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: TaskStatus::from_str(&row.get::<_, String>(3)?)
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            priority: TaskPriority::from_str(&row.get::<_, String>(4)?)
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            assignee: row.get(5)?,
            created_by: row.get(6)?,
            tags: json_list(row.get(7)?)?,
            files: json_list(row.get(8)?)?,
            created_at: ts(row.get(9)?)?,
            updated_at: ts(row.get(10)?)?,
            picked_up_at: opt_ts(row.get(11)?)?,
            completed_at: opt_ts(row.get(12)?)?,
            blocked_reason: row.get(13)?,
        })
    }

    const TASK_COLUMNS: &'static str = "id, title, description, status, priority, assignee, \
         created_by, tags, files, created_at, updated_at, picked_up_at, completed_at, \
         blocked_reason";

    pub fn put_task(&self, task: &Task) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO tasks (id, title, description, status, priority, assignee, created_by,
                               tags, files, created_at, updated_at, picked_up_at, completed_at,
                               blocked_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                title = ?2, description = ?3, status = ?4, priority = ?5, assignee = ?6,
                created_by = ?7, tags = ?8, files = ?9, created_at = ?10, updated_at = ?11,
                picked_up_at = ?12, completed_at = ?13, blocked_reason = ?14
            "#,
            params![
                &task.id,
                &task.title,
                &task.description,
                task.status.to_string(),
                task.priority.to_string(),
                &task.assignee,
                &task.created_by,
                serde_json::to_string(&task.tags)?,
                serde_json::to_string(&task.files)?,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.picked_up_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                &task.blocked_reason,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE id = ?1",
            Self::TASK_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([task_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::task_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All tasks sorted by priority (critical first) then newest-created.
    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        assignee: Option<&str>,
    ) -> Result<Vec<Task>> {
        let sql = format!("SELECT {} FROM tasks", Self::TASK_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            let task = Self::task_from_row(row)?;
            if let Some(s) = status {
                if task.status != s {
                    continue;
                }
            }
            if let Some(a) = assignee {
                if task.assignee.as_deref() != Some(a) {
                    continue;
                }
            }
            tasks.push(task);
        }
        tasks.sort_by(|a, b| {
            a.priority
                .rank()
                .cmp(&b.priority.rank())
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(tasks)
    }

    // ----- zones -----

    fn zone_from_row(row: &Row<'_>) -> Result<Zone> {
        Ok(Zone {
            zone_id: row.get(0)?,
            path: row.get(1)?,
            owner: row.get(2)?,
            description: row.get(3)?,
            claimed_at: ts(row.get(4)?)?,
        })
    }

    pub fn put_zone(&self, zone: &Zone) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO zones (zone_id, path, owner, description, claimed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(zone_id) DO UPDATE SET
                path = ?2, owner = ?3, description = ?4, claimed_at = ?5
            "#,
            params![
                &zone.zone_id,
                &zone.path,
                &zone.owner,
                &zone.description,
                zone.claimed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_zone(&self, zone_id: &str) -> Result<Option<Zone>> {
        let mut stmt = self.conn.prepare(
            "SELECT zone_id, path, owner, description, claimed_at FROM zones WHERE zone_id = ?1",
        )?;
        let mut rows = stmt.query([zone_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::zone_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn delete_zone(&self, zone_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM zones WHERE zone_id = ?1", [zone_id])?;
        Ok(n > 0)
    }

    pub fn list_zones(&self) -> Result<Vec<Zone>> {
        let mut stmt = self.conn.prepare(
            "SELECT zone_id, path, owner, description, claimed_at FROM zones ORDER BY path",
        )?;
        let mut rows = stmt.query([])?;
        let mut zones = Vec::new();
        while let Some(row) = rows.next()? {
            zones.push(Self::zone_from_row(row)?);
        }
        Ok(zones)
    }

    // ----- claims -----

    fn claim_from_row(row: &Row<'_>) -> Result<Claim> {
        Ok(Claim {
            what: row.get(0)?,
            by: row.get(1)?,
            description: row.get(2)?,
            since: ts(row.get(3)?)?,
            stale: false,
        })
    }

    pub fn get_claim(&self, what: &str) -> Result<Option<Claim>> {
        let mut stmt = self
            .conn
            .prepare("SELECT what, claimed_by, description, since FROM claims WHERE what = ?1")?;
        let mut rows = stmt.query([what])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::claim_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn put_claim(&self, claim: &Claim) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO claims (what, claimed_by, description, since)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(what) DO UPDATE SET
                claimed_by = ?2, description = ?3, since = ?4
            "#,
            params![
                &claim.what,
                &claim.by,
                &claim.description,
                claim.since.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_claim(&self, what: &str) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM claims WHERE what = ?1", [what])?;
        Ok(n > 0)
    }

    pub fn list_claims(&self) -> Result<Vec<Claim>> {
        let mut stmt = self
            .conn
            .prepare("SELECT what, claimed_by, description, since FROM claims ORDER BY since DESC")?;
        let mut rows = stmt.query([])?;
        let mut claims = Vec::new();
        while let Some(row) = rows.next()? {
            claims.push(Self::claim_from_row(row)?);
        }
        Ok(claims)
    }

    // ----- handoffs -----

    fn handoff_from_row(row: &Row<'_>) -> Result<Handoff> {
        Ok(Handoff {
            id: row.get(0)?,
            from_agent: row.get(1)?,
            to_agent: row.get(2)?,
            title: row.get(3)?,
            context: row.get(4)?,
            code: row.get(5)?,
            file_path: row.get(6)?,
            next_steps: json_list(row.get(7)?)?,
            priority: TaskPriority::from_str(&row.get::<_, String>(8)?)
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            status: HandoffStatus::from_str(&row.get::<_, String>(9)?)
                .map_err(|e| HubError::Internal(anyhow::anyhow!(e)))?,
            claimed_by: row.get(10)?,
            created_at: ts(row.get(11)?)?,
            claimed_at: opt_ts(row.get(12)?)?,
            completed_at: opt_ts(row.get(13)?)?,
        })
    }

    const HANDOFF_COLUMNS: &'static str = "id, from_agent, to_agent, title, context, code, \
         file_path, next_steps, priority, status, claimed_by, created_at, claimed_at, \
         completed_at";

    pub fn put_handoff(&self, handoff: &Handoff) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO handoffs (id, from_agent, to_agent, title, context, code, file_path,
                                  next_steps, priority, status, claimed_by, created_at,
                                  claimed_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                from_agent = ?2, to_agent = ?3, title = ?4, context = ?5, code = ?6,
                file_path = ?7, next_steps = ?8, priority = ?9, status = ?10,
                claimed_by = ?11, created_at = ?12, claimed_at = ?13, completed_at = ?14
            "#,
            params![
                &handoff.id,
                &handoff.from_agent,
                &handoff.to_agent,
                &handoff.title,
                &handoff.context,
                &handoff.code,
                &handoff.file_path,
                serde_json::to_string(&handoff.next_steps)?,
                handoff.priority.to_string(),
                handoff.status.to_string(),
                &handoff.claimed_by,
                handoff.created_at.to_rfc3339(),
                handoff.claimed_at.map(|t| t.to_rfc3339()),
                handoff.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_handoff(&self, id: &str) -> Result<Option<Handoff>> {
        let sql = format!("SELECT {} FROM handoffs WHERE id = ?1", Self::HANDOFF_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::handoff_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Handoffs newest first, optionally filtered by status.
    pub fn list_handoffs(&self, status: Option<HandoffStatus>) -> Result<Vec<Handoff>> {
        let sql = format!(
            "SELECT {} FROM handoffs ORDER BY created_at DESC",
            Self::HANDOFF_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut handoffs = Vec::new();
        while let Some(row) = rows.next()? {
            let handoff = Self::handoff_from_row(row)?;
            if let Some(s) = status {
                if handoff.status != s {
                    continue;
                }
            }
            handoffs.push(handoff);
        }
        Ok(handoffs)
    }

    pub fn count_chat(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
