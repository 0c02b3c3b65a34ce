//! SQLite-backed durable store: organizations, APIs, actions, and the
//! conversation history log.
//!
//! One shared connection guarded by a mutex; every statement is short-lived
//! and the lock is never held across an await point.

use super::{
    ActionRegistry, ApiInfo, HistoryEntry, HistoryStore, Organization, ResolvedAction,
};
use crate::schema::Action;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS organizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    api_key TEXT NOT NULL UNIQUE,
    upstream_api_key TEXT
);
CREATE TABLE IF NOT EXISTS apis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL REFERENCES organizations(id),
    api_host TEXT,
    auth_header TEXT NOT NULL DEFAULT 'Authorization',
    auth_scheme TEXT
);
CREATE TABLE IF NOT EXISTS fixed_headers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_id INTEGER NOT NULL REFERENCES apis(id),
    name TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL REFERENCES organizations(id),
    api_id INTEGER NOT NULL REFERENCES apis(id),
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    path TEXT,
    method TEXT,
    parameters TEXT,
    request_body TEXT,
    response_schema TEXT,
    key_filter TEXT
);
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    conversation_id INTEGER NOT NULL,
    conversation_index INTEGER NOT NULL,
    role TEXT NOT NULL,
    name TEXT,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation
    ON chat_messages(org_id, conversation_id, conversation_index);
";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests and `check-config` tooling.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── Seeding helpers ──────────────────────────────────────────

    pub fn insert_organization(
        &self,
        name: &str,
        api_key: &str,
        upstream_api_key: Option<&str>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO organizations (name, api_key, upstream_api_key) VALUES (?1, ?2, ?3)",
            params![name, api_key, upstream_api_key],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_api(
        &self,
        org_id: i64,
        api_host: Option<&str>,
        auth_header: &str,
        auth_scheme: Option<&str>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO apis (org_id, api_host, auth_header, auth_scheme) VALUES (?1, ?2, ?3, ?4)",
            params![org_id, api_host, auth_header, auth_scheme],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_fixed_header(&self, api_id: i64, name: &str, value: &str) -> anyhow::Result<()> {
        self.conn.lock().execute(
            "INSERT INTO fixed_headers (api_id, name, value) VALUES (?1, ?2, ?3)",
            params![api_id, name, value],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_action(
        &self,
        org_id: i64,
        api_id: i64,
        name: &str,
        description: &str,
        path: Option<&str>,
        method: Option<&str>,
        parameters: &Value,
        request_body: &Value,
        key_filter: &Value,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO actions (org_id, api_id, name, description, path, method, parameters, request_body, response_schema, key_filter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
            params![
                org_id,
                api_id,
                name,
                description,
                path,
                method,
                parameters.to_string(),
                request_body.to_string(),
                key_filter.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn resolve_action_row(
        conn: &Connection,
        org_id: i64,
        where_clause: &str,
        key: &dyn rusqlite::ToSql,
    ) -> anyhow::Result<Option<ResolvedAction>> {
        let sql = format!(
            "SELECT a.id, a.name, a.description, a.path, a.method, a.parameters, a.request_body,
                    a.response_schema, a.key_filter, a.api_id,
                    p.api_host, p.auth_header, p.auth_scheme
             FROM actions a JOIN apis p ON p.id = a.api_id
             WHERE a.org_id = ?1 AND {where_clause}"
        );
        let row = conn
            .query_row(&sql, params![org_id, key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            })
            .optional()?;

        let Some((
            id,
            name,
            description,
            path,
            method,
            parameters,
            request_body,
            response_schema,
            key_filter,
            api_id,
            api_host,
            auth_header,
            auth_scheme,
        )) = row
        else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT name, value FROM fixed_headers WHERE api_id = ?1 ORDER BY id")?;
        let fixed_headers = stmt
            .query_map(params![api_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let action = Action::from_record(
            id,
            &name,
            &description,
            path.as_deref(),
            method.as_deref(),
            &parse_json_column(parameters.as_deref()),
            &parse_json_column(request_body.as_deref()),
            response_schema
                .as_deref()
                .map(|raw| parse_json_column(Some(raw))),
            &parse_json_column(key_filter.as_deref()),
        );

        Ok(Some(ResolvedAction {
            action,
            api: ApiInfo {
                host: api_host,
                auth_header_name: auth_header,
                auth_scheme,
                fixed_headers,
            },
        }))
    }
}

/// Stored JSON columns may be NULL or malformed; both degrade to `null`
/// and the schema parser's lenient rules take over from there.
fn parse_json_column(raw: Option<&str>) -> Value {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or(Value::Null)
}

#[async_trait]
impl ActionRegistry for SqliteStore {
    async fn organization_by_token(&self, token: &str) -> anyhow::Result<Option<Organization>> {
        let conn = self.conn.lock();
        let org = conn
            .query_row(
                "SELECT id, name, api_key, upstream_api_key FROM organizations WHERE api_key = ?1",
                params![token],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        api_key: row.get(2)?,
                        upstream_api_key: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(org)
    }

    async fn action_by_name(
        &self,
        org_id: i64,
        name: &str,
    ) -> anyhow::Result<Option<ResolvedAction>> {
        let conn = self.conn.lock();
        Self::resolve_action_row(&conn, org_id, "a.name = ?2", &name)
    }

    async fn action_by_id(&self, org_id: i64, id: i64) -> anyhow::Result<Option<ResolvedAction>> {
        let conn = self.conn.lock();
        Self::resolve_action_row(&conn, org_id, "a.id = ?2", &id)
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn message_count(&self, org_id: i64, conversation_id: i64) -> anyhow::Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE org_id = ?1 AND conversation_id = ?2",
            params![org_id, conversation_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn append(
        &self,
        org_id: i64,
        conversation_id: i64,
        index: usize,
        entry: &HistoryEntry,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chat_messages (org_id, conversation_id, conversation_index, role, name, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                org_id,
                conversation_id,
                index as i64,
                entry.role,
                entry.name,
                entry.content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn last_assistant_turn(
        &self,
        org_id: i64,
        conversation_id: i64,
    ) -> anyhow::Result<Option<HistoryEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT role, name, content FROM chat_messages
                 WHERE org_id = ?1 AND conversation_id = ?2 AND role = 'assistant'
                 ORDER BY conversation_index DESC LIMIT 1",
                params![org_id, conversation_id],
                |row| {
                    Ok(HistoryEntry {
                        role: row.get(0)?,
                        name: row.get(1)?,
                        content: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }
}

// ── Tests ────────────────────────────────────────────────────────
