//! External collaborators, specified at their interfaces: the action
//! registry, the durable conversation history, and the best-effort
//! transient confirmation cache.
//!
//! The orchestrator only ever sees these traits; the SQLite store is the
//! reference durable implementation and the in-process cache the reference
//! transient one.

pub mod cache;
pub mod ratelimit;
pub mod sqlite;

use crate::schema::Action;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

// ── Records ──────────────────────────────────────────────────────

/// An organization resolved from a gateway bearer token.
#[derive(Debug, Clone)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    /// Bearer token authenticating inbound gateway calls.
    pub api_key: String,
    /// Key sent upstream when no per-call key is supplied.
    pub upstream_api_key: Option<String>,
}

/// Auth and routing material from an action's owning API definition.
#[derive(Debug, Clone, Default)]
pub struct ApiInfo {
    pub host: Option<String>,
    pub auth_header_name: String,
    pub auth_scheme: Option<String>,
    pub fixed_headers: Vec<(String, String)>,
}

/// An action joined with its owning API's host/auth/fixed headers.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    pub action: Action,
    pub api: ApiInfo,
}

/// One turn in the durable conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "function".into(),
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// One AI-proposed action invocation awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub action_id: i64,
    pub action_name: String,
    pub args: Map<String, Value>,
}

/// The set of proposed invocations awaiting human confirmation. At most one
/// exists per conversation at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub conversation_id: i64,
    pub items: Vec<PendingItem>,
}

// ── Interfaces ───────────────────────────────────────────────────

/// Read-only lookup of organizations and their actions.
#[async_trait]
pub trait ActionRegistry: Send + Sync {
    async fn organization_by_token(&self, token: &str) -> anyhow::Result<Option<Organization>>;
    async fn action_by_name(&self, org_id: i64, name: &str)
        -> anyhow::Result<Option<ResolvedAction>>;
    async fn action_by_id(&self, org_id: i64, id: i64) -> anyhow::Result<Option<ResolvedAction>>;
}

/// Append-only ordered log per conversation. The single source of truth;
/// must tolerate being the only record when the transient cache is absent.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn message_count(&self, org_id: i64, conversation_id: i64) -> anyhow::Result<usize>;
    async fn append(
        &self,
        org_id: i64,
        conversation_id: i64,
        index: usize,
        entry: &HistoryEntry,
    ) -> anyhow::Result<()>;
    async fn last_assistant_turn(
        &self,
        org_id: i64,
        conversation_id: i64,
    ) -> anyhow::Result<Option<HistoryEntry>>;
}

/// Best-effort transient store for pending batches. Unavailability or an
/// empty read must never make execution impossible; it only forces the
/// durable-history fallback.
#[async_trait]
pub trait ConfirmationCache: Send + Sync {
    async fn get(&self, conversation_id: i64) -> anyhow::Result<Option<PendingBatch>>;
    async fn put(&self, batch: &PendingBatch, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, conversation_id: i64) -> anyhow::Result<()>;
}
