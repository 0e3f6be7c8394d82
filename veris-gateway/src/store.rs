//! SQLite persistence layer.
//!
//! Holds agent identities and keys, the tool catalog, reputation scores,
//! verification records, and the audit log (appends live in [`crate::audit`]).
//! Uses WAL mode; the connection sits behind a mutex, which doubles as the
//! serialization point the audit chain requires.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("agent_id_taken")]
    AgentIdTaken,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// An agent identity row.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRow {
    pub agent_id: String,
    pub display_name: String,
    pub role: String,
    pub verification_level: String,
    pub risk_tier: String,
    pub created_at: String,
}

/// A tool catalog row.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRow {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub risk: String,
    pub json_schema: Value,
    pub requires_vault_role: Option<String>,
    pub enabled: bool,
    pub version: i64,
}

pub struct Store {
    pub(crate) db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch("PRAGMA foreign_keys=ON;")?;
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS agents (
                agent_id           TEXT PRIMARY KEY,
                display_name       TEXT NOT NULL,
                role               TEXT NOT NULL DEFAULT 'agent_runtime',
                verification_level TEXT NOT NULL DEFAULT 'none',
                risk_tier          TEXT NOT NULL DEFAULT 'low',
                created_at         TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS agent_keys (
                agent_id       TEXT PRIMARY KEY
                               REFERENCES agents(agent_id) ON DELETE CASCADE,
                public_key_pem TEXT NOT NULL,
                created_at     TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tools (
                tool_id             TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                risk                TEXT NOT NULL DEFAULT 'low',
                json_schema         TEXT NOT NULL,
                requires_vault_role TEXT,
                enabled             INTEGER NOT NULL DEFAULT 1,
                version             INTEGER NOT NULL DEFAULT 1,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS reputations (
                agent_id   TEXT PRIMARY KEY
                           REFERENCES agents(agent_id) ON DELETE CASCADE,
                score      INTEGER NOT NULL DEFAULT 50,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS verifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id    TEXT NOT NULL
                            REFERENCES agents(agent_id) ON DELETE CASCADE,
                level       TEXT NOT NULL,
                report_json TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                ts             TEXT NOT NULL DEFAULT (datetime('now')),
                actor_agent_id TEXT,
                action         TEXT NOT NULL,
                request_json   TEXT NOT NULL,
                result_json    TEXT NOT NULL,
                prev_hash      TEXT,
                row_hash       TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────────────

    /// Register an agent: identity + public key + initial reputation, in one
    /// transaction. A duplicate `agent_id` fails with `AgentIdTaken` and
    /// leaves no partial state.
    pub fn register_agent(
        &self,
        agent_id: &str,
        display_name: &str,
        public_key_pem: &str,
    ) -> Result<(), StoreError> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AgentIdTaken);
        }

        tx.execute(
            "INSERT INTO agents (agent_id, display_name) VALUES (?1, ?2)",
            params![agent_id, display_name],
        )?;
        tx.execute(
            "INSERT INTO agent_keys (agent_id, public_key_pem) VALUES (?1, ?2)",
            params![agent_id, public_key_pem],
        )?;
        tx.execute(
            "INSERT INTO reputations (agent_id, score) VALUES (?1, 50)",
            params![agent_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRow>, StoreError> {
        let db = self.db.lock();
        let row = db
            .query_row(
                "SELECT agent_id, display_name, role, verification_level, risk_tier, created_at
                 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok(AgentRow {
                        agent_id: row.get(0)?,
                        display_name: row.get(1)?,
                        role: row.get(2)?,
                        verification_level: row.get(3)?,
                        risk_tier: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_agent_key(&self, agent_id: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.lock();
        let pem = db
            .query_row(
                "SELECT public_key_pem FROM agent_keys WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(pem)
    }

    pub fn set_verification_level(&self, agent_id: &str, level: &str) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute(
            "UPDATE agents SET verification_level = ?1 WHERE agent_id = ?2",
            params![level, agent_id],
        )?;
        Ok(())
    }

    // ── Tool catalog ───────────────────────────────────────────────────

    /// Insert or replace a catalog entry.
    pub fn upsert_tool(&self, tool: &ToolRow) -> Result<(), StoreError> {
        let schema = serde_json::to_string(&tool.json_schema)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO tools (tool_id, name, description, risk, json_schema, requires_vault_role, enabled, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tool_id) DO UPDATE SET
                name=excluded.name,
                description=excluded.description,
                risk=excluded.risk,
                json_schema=excluded.json_schema,
                requires_vault_role=excluded.requires_vault_role,
                enabled=excluded.enabled,
                version=excluded.version",
            params![
                tool.tool_id,
                tool.name,
                tool.description,
                tool.risk,
                schema,
                tool.requires_vault_role,
                tool.enabled as i32,
                tool.version,
            ],
        )?;
        Ok(())
    }

    /// Seed the builtin catalog. `INSERT OR IGNORE` so operator edits
    /// (disabling a tool, changing risk) survive restarts.
    pub fn seed_builtin_tools(&self, pg_vault_role: &str) -> Result<(), StoreError> {
        let builtins = crate::tools::builtin_catalog(pg_vault_role);
        let db = self.db.lock();
        for tool in &builtins {
            let schema = serde_json::to_string(&tool.json_schema)?;
            db.execute(
                "INSERT OR IGNORE INTO tools (tool_id, name, description, risk, json_schema, requires_vault_role, enabled, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tool.tool_id,
                    tool.name,
                    tool.description,
                    tool.risk,
                    schema,
                    tool.requires_vault_role,
                    tool.enabled as i32,
                    tool.version,
                ],
            )?;
        }
        Ok(())
    }

    /// Fetch a tool that is present and enabled. Disabled and unknown tools
    /// are indistinguishable to callers.
    pub fn get_enabled_tool(&self, tool_id: &str) -> Result<Option<ToolRow>, StoreError> {
        let db = self.db.lock();
        let row = db
            .query_row(
                "SELECT tool_id, name, description, risk, json_schema, requires_vault_role, enabled, version
                 FROM tools WHERE tool_id = ?1 AND enabled = 1",
                params![tool_id],
                map_tool_row,
            )
            .optional()?;
        match row {
            Some((tool, schema_json)) => Ok(Some(finish_tool_row(tool, &schema_json)?)),
            None => Ok(None),
        }
    }

    /// All enabled tools, for the public listing.
    pub fn list_enabled_tools(&self) -> Result<Vec<ToolRow>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT tool_id, name, description, risk, json_schema, requires_vault_role, enabled, version
             FROM tools WHERE enabled = 1 ORDER BY tool_id",
        )?;
        let rows = stmt
            .query_map([], map_tool_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(tool, schema_json)| finish_tool_row(tool, &schema_json))
            .collect()
    }

    // ── Reputation ─────────────────────────────────────────────────────

    pub fn reputation(&self, agent_id: &str) -> Result<Option<i64>, StoreError> {
        let db = self.db.lock();
        let score = db
            .query_row(
                "SELECT score FROM reputations WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }

    /// Apply a signed delta, clamped to [0, 100] in the same write.
    /// Returns the new score, or None when the agent has no reputation row.
    pub fn adjust_reputation(&self, agent_id: &str, delta: i64) -> Result<Option<i64>, StoreError> {
        let db = self.db.lock();
        db.execute(
            "UPDATE reputations
             SET score = MAX(0, MIN(100, score + ?1)), updated_at = datetime('now')
             WHERE agent_id = ?2",
            params![delta, agent_id],
        )?;
        let score = db
            .query_row(
                "SELECT score FROM reputations WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }

    // ── Verifications ──────────────────────────────────────────────────

    /// Append a verification record (the table is append-only).
    pub fn insert_verification(
        &self,
        agent_id: &str,
        level: &str,
        report: &Value,
    ) -> Result<(), StoreError> {
        let report_json = serde_json::to_string(report)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO verifications (agent_id, level, report_json) VALUES (?1, ?2, ?3)",
            params![agent_id, level, report_json],
        )?;
        Ok(())
    }

    pub fn verification_count(&self, agent_id: &str) -> Result<i64, StoreError> {
        let db = self.db.lock();
        let n = db.query_row(
            "SELECT COUNT(*) FROM verifications WHERE agent_id = ?1",
            params![agent_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

type RawToolRow = (ToolRow, String);

fn map_tool_row(row: &rusqlite::Row) -> rusqlite::Result<RawToolRow> {
    let schema_json: String = row.get(4)?;
    Ok((
        ToolRow {
            tool_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            risk: row.get(3)?,
            json_schema: Value::Null,
            requires_vault_role: row.get(5)?,
            enabled: row.get::<_, i32>(6)? != 0,
            version: row.get(7)?,
        },
        schema_json,
    ))
}

fn finish_tool_row(mut tool: ToolRow, schema_json: &str) -> Result<ToolRow, StoreError> {
    tool.json_schema = serde_json::from_str(schema_json)?;
    Ok(tool)
}
