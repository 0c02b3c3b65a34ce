//! Response filter: prunes a raw HTTP response down to the action's
//! configured key allow-list.

use crate::schema::{Action, KeyFilter};
use serde_json::Value;

/// Filtered view of an action's raw response. Filtering never raises: a
/// body that fails to parse as JSON passes through as an opaque string with
/// the `non_json` warning flag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredResponse {
    pub body: Value,
    pub non_json: bool,
}

/// Apply the action's key filter to a raw response body.
pub fn filter_response(raw: &str, action: &Action) -> FilteredResponse {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return FilteredResponse {
            body: Value::String(raw.to_string()),
            non_json: true,
        };
    };

    let body = match &action.key_filter {
        KeyFilter::KeepAll => parsed,
        KeyFilter::Keys(keys) => retain_keys(parsed, keys),
    };
    FilteredResponse {
        body,
        non_json: false,
    }
}

/// Recursively retain only allow-listed keys at every object level,
/// preserving array structure and ordering.
fn retain_keys(value: Value, keys: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| keys.iter().any(|allowed| allowed == k))
                .map(|(k, v)| (k, retain_keys(v, keys)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| retain_keys(v, keys)).collect())
        }
        scalar => scalar,
    }
}

// ── Tests ────────────────────────────────────────────────────────
