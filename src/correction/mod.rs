//! Correction loop: asks the language model to supply values for required
//! arguments the AI left out of a proposed call.
//!
//! Parameters are corrected strictly sequentially so each prompt's context
//! stays causally dependent on the previous answer. Do not parallelize.

use crate::providers::{ChatMessage, CompletionProvider, GenerationParams};
use crate::schema::Action;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Sentinel the model replies with when a value cannot be inferred and the
/// end user must be asked explicitly. Propagated to the caller as-is.
pub const ASK_USER: &str = "ask user";

/// Marker separating the conversational system instruction from the embedded
/// function-call catalogue. The catalogue is irrelevant to a single-parameter
/// correction and is stripped before prompting.
pub const FUNCTION_CATALOGUE_MARKER: &str = "You MUST exclusively use the functions listed below";

/// Bounds on the correction loop. Mirrors `[correction]` in config.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionLimits {
    /// Most recent conversation turns kept when trimming history.
    pub max_history_turns: usize,
    /// Approximate token budget for the trimmed history.
    pub history_token_budget: usize,
    /// Hard cap on the model's answer length.
    pub max_response_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl From<&crate::config::Config> for CorrectionLimits {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            max_history_turns: config.correction.max_history_turns,
            history_token_budget: config.correction.history_token_budget,
            max_response_tokens: config.correction.max_response_tokens,
            temperature: config.llm.temperature,
        }
    }
}

/// Outcome of a correction pass over one action's missing parameters.
#[derive(Debug, Default)]
pub struct CorrectionOutcome {
    /// Resolved values keyed by parameter name. May contain the
    /// [`ASK_USER`] sentinel as a plain string value. Parameters that
    /// could not be corrected are absent.
    pub resolved: Map<String, Value>,
    /// The final correction prompt exchanged, for system-message injection
    /// into the ongoing conversation. Last write wins across parameters.
    pub transcript: Option<Vec<ChatMessage>>,
}

/// Run the correction loop for every missing parameter, sequentially.
///
/// A parameter with no schema definition is skipped (no sensible ask can be
/// phrased). A failed completion call leaves that parameter unresolved and
/// the loop continues; no partial resolution blocks later parameters.
pub async fn resolve_missing_args(
    provider: &dyn CompletionProvider,
    action: &Action,
    missing: &[String],
    conversation: &[ChatMessage],
    limits: CorrectionLimits,
) -> CorrectionOutcome {
    let mut outcome = CorrectionOutcome::default();
    let trimmed = trim_conversation(
        conversation,
        limits.max_history_turns,
        limits.history_token_budget,
    );

    for param in missing {
        let Some(prompt) = correction_prompt(param, action) else {
            debug!(param, action = %action.name, "no correction prompt possible; leaving unresolved");
            continue;
        };

        let mut messages = trimmed.clone();
        messages.extend(prompt.iter().cloned());
        outcome.transcript = Some(prompt);

        let params = GenerationParams {
            temperature: limits.temperature,
            max_tokens: limits.max_response_tokens,
        };
        match provider.complete(&messages, params).await {
            Ok(raw) => {
                let value = parse_correction_response(&raw);
                debug!(param, %value, "correction resolved");
                outcome.resolved.insert(param.clone(), value);
            }
            Err(e) => {
                warn!(param, action = %action.name, "correction call failed: {e:#}");
            }
        }
    }

    outcome
}

/// Build the correction prompt for one missing parameter, or `None` when the
/// parameter resolves to no definition in the action schema.
pub fn correction_prompt(param: &str, action: &Action) -> Option<Vec<ChatMessage>> {
    let ask = action.describe_parameter(param)?;
    let mut text = format!(
        "The call to \"{}\" ({}) is missing the required parameter \"{}\"",
        action.name, action.description, ask.name
    );
    if let Some(description) = ask.description {
        text.push_str(&format!(" ({description})"));
    }
    text.push_str(&format!(
        ". Infer a value for \"{}\" from the conversation above and reply with \
         that value only. If it cannot be inferred, reply exactly \"{ASK_USER}\".",
        ask.name
    ));
    Some(vec![ChatMessage::user(text)])
}

/// Bound the conversation to its most recent turns and an approximate token
/// budget, always preserving the system instruction with the function-call
/// catalogue stripped out.
pub fn trim_conversation(
    conversation: &[ChatMessage],
    max_turns: usize,
    token_budget: usize,
) -> Vec<ChatMessage> {
    let mut result = Vec::new();
    if let Some(system) = conversation.iter().find(|m| m.role == "system") {
        result.push(strip_function_catalogue(system));
    }

    let recent: Vec<&ChatMessage> = conversation
        .iter()
        .filter(|m| m.role != "system")
        .rev()
        .take(max_turns.max(1))
        .collect();

    // Drop the oldest of the kept turns while over budget, but always keep
    // the newest one.
    let mut kept: Vec<&ChatMessage> = Vec::new();
    let mut tokens = 0usize;
    for message in recent {
        let cost = approx_tokens(&message.content);
        if !kept.is_empty() && tokens + cost > token_budget {
            break;
        }
        tokens += cost;
        kept.push(message);
    }
    result.extend(kept.into_iter().rev().cloned());
    result
}

/// Strip the embedded function-call catalogue from a system turn.
fn strip_function_catalogue(system: &ChatMessage) -> ChatMessage {
    let content = system
        .content
        .split(FUNCTION_CATALOGUE_MARKER)
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    ChatMessage::system(content)
}

/// Rough token estimate (~4 chars per token).
fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Normalize a raw correction answer: trim whitespace, strip newlines, and
/// recover typed values via JSON parsing where possible. A response that is
/// not valid JSON stays a plain string, including the [`ASK_USER`] sentinel.
pub fn parse_correction_response(raw: &str) -> Value {
    let cleaned = raw.trim().replace('\n', "");
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => value,
        Err(_) => Value::String(cleaned),
    }
}

// ── Tests ────────────────────────────────────────────────────────
