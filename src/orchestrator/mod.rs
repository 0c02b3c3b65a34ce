//! Confirmation orchestrator: the lifecycle of a proposed action batch.
//!
//! A batch moves through `NoPending → AwaitingConfirmation` on propose, then
//! to `Executing → Resolved` on confirm or to `Cancelled` on cancel. The
//! transient cache holds the pending batch between propose and confirm; the
//! durable history is the fallback source when the cache has lost it.

pub mod commands;

use crate::config::Config;
use crate::correction::{self, CorrectionLimits, ASK_USER};
use crate::providers::{ChatMessage, CompletionProvider};
use crate::request::{self, execute};
use crate::response;
use crate::schema::{audit, AuthContext};
use crate::store::{
    ActionRegistry, ConfirmationCache, HistoryEntry, HistoryStore, Organization, PendingBatch,
    PendingItem, ResolvedAction,
};
use commands::CommandLine;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CANCEL_USER_TURN: &str = "Cancel actions";
const CANCEL_NOTICE: &str =
    "I've cancelled the proposed actions. What would you like me to do instead?";

/// An AI-proposed call as it arrives from the conversation pipeline.
#[derive(Debug, Clone)]
pub struct ProposedCall {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Result of proposing a batch: the assistant turn appended to history and
/// any parameters the user still has to supply.
#[derive(Debug)]
pub struct ProposeOutcome {
    pub message: String,
    /// `action.parameter` names the correction loop deferred to the user.
    pub needs_user: Vec<String>,
    /// Final correction exchange, for injection into the live conversation.
    pub correction_transcript: Option<Vec<ChatMessage>>,
}

/// Per-item outcome of a confirmed batch, in proposal order. Failures are
/// carried here as that item's result, never as a batch failure.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub action: String,
    /// Reserved history index the result was recorded at.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-confirm options from the inbound request.
#[derive(Debug, Clone, Default)]
pub struct ConfirmOptions {
    pub user_api_key: Option<String>,
    /// Redirect every outbound call to the mock endpoint.
    pub mock: bool,
}

pub struct Orchestrator {
    registry: Arc<dyn ActionRegistry>,
    history: Arc<dyn HistoryStore>,
    cache: Arc<dyn ConfirmationCache>,
    provider: Arc<dyn CompletionProvider>,
    client: reqwest::Client,
    config: Config,
    /// Live cancellation tokens, one per conversation with an in-flight
    /// confirm.
    cancellations: Mutex<HashMap<i64, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ActionRegistry>,
        history: Arc<dyn HistoryStore>,
        cache: Arc<dyn ConfirmationCache>,
        provider: Arc<dyn CompletionProvider>,
        config: Config,
    ) -> anyhow::Result<Self> {
        let client = execute::build_client(config.gateway.request_timeout_secs)?;
        Ok(Self {
            registry,
            history,
            cache,
            provider,
            client,
            config,
            cancellations: Mutex::new(HashMap::new()),
        })
    }

    // ── Propose ──────────────────────────────────────────────────

    /// Audit and correct a batch of proposed calls, stash it pending
    /// confirmation, and append the proposal turn to durable history.
    ///
    /// Calls naming an unknown action are dropped from the batch with a
    /// warning; a wholly unknown batch still yields a (command-less)
    /// proposal turn so the conversation stays coherent.
    pub async fn propose(
        &self,
        org: &Organization,
        conversation_id: i64,
        calls: &[ProposedCall],
        conversation: &[ChatMessage],
    ) -> anyhow::Result<ProposeOutcome> {
        let limits = CorrectionLimits::from(&self.config);
        let mut items = Vec::new();
        let mut needs_user = Vec::new();
        let mut correction_transcript = None;

        for call in calls {
            let Some(resolved) = self.registry.action_by_name(org.id, &call.name).await? else {
                warn!(action = %call.name, "proposed call names an unknown action; dropping");
                continue;
            };
            let action = resolved.action;

            let mut args = call.args.clone();
            let missing = audit::missing_required_args(&action, &args);
            if !missing.is_empty() {
                debug!(action = %action.name, ?missing, "running correction loop");
                let outcome = correction::resolve_missing_args(
                    self.provider.as_ref(),
                    &action,
                    &missing,
                    conversation,
                    limits,
                )
                .await;
                for (param, value) in outcome.resolved {
                    if value == Value::String(ASK_USER.to_string()) {
                        needs_user.push(format!("{}.{param}", action.name));
                    } else {
                        args.insert(param, value);
                    }
                }
                if outcome.transcript.is_some() {
                    correction_transcript = outcome.transcript;
                }
            }

            items.push(PendingItem {
                action_id: action.id,
                action_name: action.name,
                args,
            });
        }

        let batch = PendingBatch {
            conversation_id,
            items,
        };
        if self.config.cache.enabled {
            let ttl = Duration::from_secs(self.config.cache.ttl_secs);
            // Best-effort: a failed put only means confirm will take the
            // durable-history path.
            if let Err(e) = self.cache.put(&batch, ttl).await {
                warn!(conversation_id, "confirmation cache write failed: {e:#}");
            }
        }

        let message = render_proposal(&batch.items, &needs_user);
        let index = self.history.message_count(org.id, conversation_id).await?;
        self.history
            .append(
                org.id,
                conversation_id,
                index,
                &HistoryEntry::assistant(message.clone()),
            )
            .await?;
        info!(
            conversation_id,
            items = batch.items.len(),
            "batch proposed, awaiting confirmation"
        );

        Ok(ProposeOutcome {
            message,
            needs_user,
            correction_transcript,
        })
    }

    // ── Cancel ───────────────────────────────────────────────────

    /// Cancel whatever is pending for a conversation. Idempotent; never
    /// performs HTTP calls. Returns the assistant notice appended to
    /// history.
    pub async fn cancel(
        &self,
        org: &Organization,
        conversation_id: i64,
    ) -> anyhow::Result<String> {
        // Cancellation must go through even when the cache backend is down;
        // a stale entry only ages out, it is never executed unconfirmed.
        if let Err(e) = self.cache.delete(conversation_id).await {
            warn!(conversation_id, "confirmation cache delete failed: {e:#}");
        }

        if let Some(token) = self.cancellations.lock().remove(&conversation_id) {
            token.cancel();
        }

        let count = self.history.message_count(org.id, conversation_id).await?;
        self.history
            .append(
                org.id,
                conversation_id,
                count,
                &HistoryEntry::user(CANCEL_USER_TURN),
            )
            .await?;
        self.history
            .append(
                org.id,
                conversation_id,
                count + 1,
                &HistoryEntry::assistant(CANCEL_NOTICE),
            )
            .await?;

        info!(conversation_id, "pending batch cancelled");
        Ok(CANCEL_NOTICE.to_string())
    }

    // ── Confirm ──────────────────────────────────────────────────

    /// Execute the pending batch for a conversation.
    ///
    /// At-most-once: the cache entry is read and deleted before any HTTP
    /// dispatch. When the cache has nothing, the batch is reconstructed
    /// from the `Commands:` block of the most recent assistant turn.
    pub async fn confirm(
        &self,
        org: &Organization,
        conversation_id: i64,
        opts: &ConfirmOptions,
    ) -> anyhow::Result<Vec<ItemOutcome>> {
        let items = match self.dequeue(conversation_id).await? {
            Some(items) => items,
            None => self.fallback_from_history(org, conversation_id).await?,
        };
        if items.is_empty() {
            debug!(conversation_id, "nothing pending to confirm");
            return Ok(Vec::new());
        }

        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .insert(conversation_id, token.clone());

        let start = self.history.message_count(org.id, conversation_id).await?;
        let futures = items.iter().enumerate().map(|(i, item)| {
            let token = token.clone();
            let index = start + i;
            async move {
                if token.is_cancelled() {
                    debug!(action = %item.action_name, "cancelled before dispatch");
                    return None;
                }
                let outcome = self.execute_item(org, item, index, opts).await;
                if token.is_cancelled() {
                    debug!(action = %item.action_name, "cancelled mid-flight; result discarded");
                    return None;
                }
                let content = outcome
                    .error
                    .clone()
                    .map(|e| format!("Error: {e}"))
                    .unwrap_or_else(|| pretty_body(&outcome.body));
                if let Err(e) = self
                    .history
                    .append(
                        org.id,
                        conversation_id,
                        index,
                        &HistoryEntry::function(&item.action_name, content),
                    )
                    .await
                {
                    warn!(action = %item.action_name, "failed to record result: {e:#}");
                }
                Some(outcome)
            }
        });
        let outcomes: Vec<ItemOutcome> = join_all(futures).await.into_iter().flatten().collect();

        self.cancellations.lock().remove(&conversation_id);
        info!(
            conversation_id,
            executed = outcomes.len(),
            "batch confirmation finished"
        );
        Ok(outcomes)
    }

    /// Read-and-delete the pending batch. `Ok(None)` means the cache is
    /// disabled, empty, or failing; all of those force the fallback.
    async fn dequeue(&self, conversation_id: i64) -> anyhow::Result<Option<Vec<PendingItem>>> {
        if !self.config.cache.enabled {
            return Ok(None);
        }
        let batch = match self.cache.get(conversation_id).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(conversation_id, "confirmation cache read failed: {e:#}");
                None
            }
        };
        let Some(batch) = batch else {
            return Ok(None);
        };
        // Delete before executing so a concurrent confirm finds nothing.
        if let Err(e) = self.cache.delete(conversation_id).await {
            warn!(conversation_id, "confirmation cache delete failed: {e:#}");
        }
        Ok(Some(batch.items))
    }

    /// Rebuild the pending batch from the last assistant turn's `Commands:`
    /// block, re-resolving every action reference against the registry.
    async fn fallback_from_history(
        &self,
        org: &Organization,
        conversation_id: i64,
    ) -> anyhow::Result<Vec<PendingItem>> {
        let Some(turn) = self
            .history
            .last_assistant_turn(org.id, conversation_id)
            .await?
        else {
            return Ok(Vec::new());
        };
        let parsed = commands::parse_block(&turn.content);
        if parsed.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            conversation_id,
            items = parsed.len(),
            "reconstructing batch from durable history"
        );

        let mut items = Vec::new();
        for CommandLine { name, args } in parsed {
            let Some(resolved) = self.registry.action_by_name(org.id, &name).await? else {
                warn!(action = %name, "recorded command names an unknown action; skipping");
                continue;
            };
            items.push(PendingItem {
                action_id: resolved.action.id,
                action_name: resolved.action.name,
                args,
            });
        }
        Ok(items)
    }

    /// Run one batch item end to end. Every failure mode is folded into the
    /// returned outcome.
    async fn execute_item(
        &self,
        org: &Organization,
        item: &PendingItem,
        index: usize,
        opts: &ConfirmOptions,
    ) -> ItemOutcome {
        let failed = |error: String| ItemOutcome {
            action: item.action_name.clone(),
            index,
            status: None,
            body: Value::Null,
            error: Some(error),
        };

        let resolved = match self.registry.action_by_id(org.id, item.action_id).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return failed(format!("unknown action: {}", item.action_name)),
            Err(e) => return failed(format!("registry lookup failed: {e:#}")),
        };
        let auth = self.auth_context(org, &resolved, opts);

        let prepared = match request::build(&resolved.action, &item.args, &auth) {
            Ok(prepared) => prepared,
            Err(e) => return failed(e.to_string()),
        };

        match execute::send(&self.client, &prepared).await {
            Ok(output) => {
                let filtered = response::filter_response(&output.body, &resolved.action);
                if filtered.non_json {
                    warn!(action = %item.action_name, "upstream returned a non-JSON body");
                }
                ItemOutcome {
                    action: item.action_name.clone(),
                    index,
                    status: Some(output.status),
                    body: filtered.body,
                    error: None,
                }
            }
            Err(e) => failed(format!("request to {} failed: {e:#}", prepared.url)),
        }
    }

    /// Auth material for one item. Mock mode swaps only the host; the
    /// user's per-call key beats the organization's stored key.
    fn auth_context(
        &self,
        org: &Organization,
        resolved: &ResolvedAction,
        opts: &ConfirmOptions,
    ) -> AuthContext {
        let api_host = if opts.mock {
            Some(self.mock_base())
        } else {
            resolved.api.host.clone()
        };
        AuthContext {
            api_host,
            auth_header_name: resolved.api.auth_header_name.clone(),
            auth_scheme: resolved.api.auth_scheme.clone(),
            user_api_key: opts.user_api_key.clone(),
            org_api_key: org.upstream_api_key.clone(),
            fixed_headers: resolved.api.fixed_headers.clone(),
        }
    }

    fn mock_base(&self) -> String {
        self.config.gateway.mock_url.clone().unwrap_or_else(|| {
            format!(
                "http://{}:{}/api/mock",
                self.config.gateway.host, self.config.gateway.port
            )
        })
    }
}

/// Render the assistant proposal turn: short prose, the machine-readable
/// `Commands:` block, and an ask for anything the user must still supply.
fn render_proposal(items: &[PendingItem], needs_user: &[String]) -> String {
    let commands: Vec<CommandLine> = items
        .iter()
        .map(|item| CommandLine {
            name: item.action_name.clone(),
            args: item.args.clone(),
        })
        .collect();
    let mut message = String::from("Please confirm the actions below before I run them.\n\n");
    message.push_str(&commands::render_block(&commands));
    if !needs_user.is_empty() {
        message.push_str(&format!(
            "\n\nI still need values for: {}.",
            needs_user.join(", ")
        ));
    }
    message
}

fn pretty_body(body: &Value) -> String {
    serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::GenerationParams;
    use crate::store::cache::MemoryCache;
    use crate::store::sqlite::SqliteStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct ScriptedProvider {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(answers: Vec<&str>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _params: GenerationParams,
        ) -> anyhow::Result<String> {
            let mut answers = self.answers.lock();
            if answers.is_empty() {
                anyhow::bail!("no scripted answer left");
            }
            Ok(answers.remove(0))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        org: Organization,
        store: Arc<SqliteStore>,
    }

    /// Cache backend that fails every operation.
    struct FailingCache;

    #[async_trait]
    impl ConfirmationCache for FailingCache {
        async fn get(&self, _conversation_id: i64) -> anyhow::Result<Option<PendingBatch>> {
            anyhow::bail!("cache backend unreachable")
        }

        async fn put(&self, _batch: &PendingBatch, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("cache backend unreachable")
        }

        async fn delete(&self, _conversation_id: i64) -> anyhow::Result<()> {
            anyhow::bail!("cache backend unreachable")
        }
    }

    /// One org with one GET action missing its API host, so execution
    /// stays off the network and fails with a configuration error.
    fn hostless_fixture(answers: Vec<&str>) -> Fixture {
        hostless_fixture_with_cache(Arc::new(MemoryCache::new()), answers)
    }

    fn hostless_fixture_with_cache(
        cache: Arc<dyn ConfirmationCache>,
        answers: Vec<&str>,
    ) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let org_id = store.insert_organization("Acme", "token", None).unwrap();
        let api_id = store.insert_api(org_id, None, "Authorization", None).unwrap();
        store
            .insert_action(
                org_id,
                api_id,
                "get_weather",
                "Get the weather",
                Some("/weather"),
                Some("get"),
                &json!([{"name": "city", "in": "query", "required": true, "description": "City"}]),
                &json!(null),
                &json!(null),
            )
            .unwrap();
        let org = Organization {
            id: org_id,
            name: "Acme".into(),
            api_key: "token".into(),
            upstream_api_key: None,
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            cache,
            Arc::new(ScriptedProvider::new(answers)),
            Config::default(),
        )
        .unwrap();
        Fixture {
            orchestrator,
            org,
            store,
        }
    }

    fn call(name: &str, args: Value) -> ProposedCall {
        ProposedCall {
            name: name.into(),
            args: args.as_object().unwrap().clone(),
        }
    }

    #[tokio::test]
    async fn propose_writes_proposal_turn_with_commands_block() {
        let f = hostless_fixture(vec![]);
        let outcome = f
            .orchestrator
            .propose(
                &f.org,
                1,
                &[call("get_weather", json!({"city": "Paris"}))],
                &[],
            )
            .await
            .unwrap();
        assert!(outcome.message.contains(commands::COMMANDS_HEADING));
        assert!(outcome.needs_user.is_empty());

        let turn = f.store.last_assistant_turn(f.org.id, 1).await.unwrap().unwrap();
        let parsed = commands::parse_block(&turn.content);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "get_weather");
        assert_eq!(parsed[0].args.get("city"), Some(&json!("Paris")));
    }

    #[tokio::test]
    async fn propose_corrects_missing_args_via_model() {
        let f = hostless_fixture(vec!["\"Lisbon\""]);
        let outcome = f
            .orchestrator
            .propose(
                &f.org,
                1,
                &[call("get_weather", json!({}))],
                &[ChatMessage::user("what's it like in Lisbon?")],
            )
            .await
            .unwrap();
        assert!(outcome.correction_transcript.is_some());

        let turn = f.store.last_assistant_turn(f.org.id, 1).await.unwrap().unwrap();
        let parsed = commands::parse_block(&turn.content);
        assert_eq!(parsed[0].args.get("city"), Some(&json!("Lisbon")));
    }

    #[tokio::test]
    async fn ask_user_sentinel_defers_to_the_user() {
        let f = hostless_fixture(vec![ASK_USER]);
        let outcome = f
            .orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({}))], &[])
            .await
            .unwrap();
        assert_eq!(outcome.needs_user, vec!["get_weather.city"]);
        assert!(outcome.message.contains("get_weather.city"));

        // The deferred parameter is not smuggled into the pending args.
        let turn = f.store.last_assistant_turn(f.org.id, 1).await.unwrap().unwrap();
        let parsed = commands::parse_block(&turn.content);
        assert!(parsed[0].args.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_is_dropped_from_the_batch() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(&f.org, 1, &[call("no_such_action", json!({}))], &[])
            .await
            .unwrap();
        let turn = f.store.last_assistant_turn(f.org.id, 1).await.unwrap().unwrap();
        assert!(commands::parse_block(&turn.content).is_empty());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_appends_two_turns() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({"city": "Oslo"}))], &[])
            .await
            .unwrap();
        let before = f.store.message_count(f.org.id, 1).await.unwrap();

        let notice = f.orchestrator.cancel(&f.org, 1).await.unwrap();
        assert_eq!(notice, CANCEL_NOTICE);
        assert_eq!(f.store.message_count(f.org.id, 1).await.unwrap(), before + 2);

        // A second cancel with nothing pending still succeeds.
        f.orchestrator.cancel(&f.org, 1).await.unwrap();
        assert_eq!(f.store.message_count(f.org.id, 1).await.unwrap(), before + 4);
    }

    #[tokio::test]
    async fn confirm_after_cancel_finds_nothing() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({"city": "Oslo"}))], &[])
            .await
            .unwrap();
        f.orchestrator.cancel(&f.org, 1).await.unwrap();

        // The cancel notice is now the last assistant turn, so the durable
        // fallback reconstructs nothing either.
        let outs = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        assert!(outs.is_empty());
    }

    #[tokio::test]
    async fn item_scoped_configuration_error_is_recorded_not_raised() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({"city": "Oslo"}))], &[])
            .await
            .unwrap();
        let before = f.store.message_count(f.org.id, 1).await.unwrap();

        let outs = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].index, before);
        assert!(outs[0].error.as_deref().unwrap().contains("no API host"));
        assert!(outs[0].status.is_none());

        // The failure was durably recorded as a function turn.
        assert_eq!(f.store.message_count(f.org.id, 1).await.unwrap(), before + 1);
    }

    #[tokio::test]
    async fn second_confirm_dequeues_nothing_from_cache() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({"city": "Oslo"}))], &[])
            .await
            .unwrap();
        let first = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // The cache entry is gone; the fallback re-reads the proposal turn,
        // which is still the last *assistant* turn (results are function
        // turns), so the durable path reconstructs the same batch.
        let second = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn fallback_reconstructs_batch_when_cache_disabled() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let org_id = store.insert_organization("Acme", "token", None).unwrap();
        let api_id = store.insert_api(org_id, None, "Authorization", None).unwrap();
        store
            .insert_action(
                org_id,
                api_id,
                "get_weather",
                "",
                Some("/weather"),
                Some("get"),
                &json!([{"name": "city", "in": "query", "required": true}]),
                &json!(null),
                &json!(null),
            )
            .unwrap();
        let org = Organization {
            id: org_id,
            name: "Acme".into(),
            api_key: "token".into(),
            upstream_api_key: None,
        };
        let mut config = Config::default();
        config.cache.enabled = false;
        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(ScriptedProvider::new(vec![])),
            config,
        )
        .unwrap();

        orchestrator
            .propose(&org, 9, &[call("get_weather", json!({"city": "Rome"}))], &[])
            .await
            .unwrap();
        let outs = orchestrator
            .confirm(&org, 9, &ConfirmOptions::default())
            .await
            .unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].action, "get_weather");
    }

    #[tokio::test]
    async fn cache_backend_failure_never_blocks_cancel_or_confirm() {
        let f = hostless_fixture_with_cache(Arc::new(FailingCache), vec![]);

        // Propose survives the failed put; the proposal turn still lands.
        f.orchestrator
            .propose(&f.org, 1, &[call("get_weather", json!({"city": "Oslo"}))], &[])
            .await
            .unwrap();
        assert_eq!(f.store.message_count(f.org.id, 1).await.unwrap(), 1);

        // Confirm survives the failed get and executes via the durable
        // fallback.
        let outs = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        assert_eq!(outs.len(), 1);

        // Cancel survives the failed delete and appends both turns.
        let before = f.store.message_count(f.org.id, 1).await.unwrap();
        let notice = f.orchestrator.cancel(&f.org, 1).await.unwrap();
        assert_eq!(notice, CANCEL_NOTICE);
        assert_eq!(f.store.message_count(f.org.id, 1).await.unwrap(), before + 2);
    }

    #[tokio::test]
    async fn confirm_with_no_history_at_all_is_empty() {
        let f = hostless_fixture(vec![]);
        let outs = f
            .orchestrator
            .confirm(&f.org, 404, &ConfirmOptions::default())
            .await
            .unwrap();
        assert!(outs.is_empty());
    }

    #[tokio::test]
    async fn batch_items_get_consecutive_reserved_indices() {
        let f = hostless_fixture(vec![]);
        f.orchestrator
            .propose(
                &f.org,
                1,
                &[
                    call("get_weather", json!({"city": "Oslo"})),
                    call("get_weather", json!({"city": "Rome"})),
                ],
                &[],
            )
            .await
            .unwrap();
        let start = f.store.message_count(f.org.id, 1).await.unwrap();
        let outs = f
            .orchestrator
            .confirm(&f.org, 1, &ConfirmOptions::default())
            .await
            .unwrap();
        let mut indices: Vec<usize> = outs.iter().map(|o| o.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![start, start + 1]);
    }
}
