//! Typed representation of actions and their schemas.
//!
//! Actions arrive from the registry as loosely-typed JSON blobs (OpenAPI-ish
//! parameter lists, request-body shapes, key filters). They are validated
//! into the types here once, at the registry boundary; everything downstream
//! works with the typed form.

pub mod audit;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Action ───────────────────────────────────────────────────────

/// A schema-described callable HTTP endpoint exposed to the AI.
/// Immutable per invocation; owned by the action registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Endpoint path relative to the API host (e.g. `/weather/{city}`).
    pub path: Option<String>,
    /// HTTP method as stored. Case-insensitive; `None` means the registry
    /// never declared one and the request builder must refuse to guess.
    pub method: Option<String>,
    /// Query and path parameters in declaration order.
    pub parameters: Vec<ParameterDef>,
    /// Request-body shape, when the action takes a body.
    pub request_body: Option<BodySchema>,
    /// Response shape, kept for documentation and future validation.
    pub response_schema: Option<Value>,
    /// Allow-list of response keys retained after execution.
    pub key_filter: KeyFilter,
}

/// A single query or path parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub location: ParameterLocation,
}

/// Where a parameter is placed in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    #[default]
    Query,
    Path,
}

/// Request-body shape: the required-field list plus named properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodySchema {
    #[serde(default)]
    pub required: Vec<String>,
    /// Property names in declaration order.
    #[serde(default)]
    pub properties: Vec<BodyField>,
}

/// A named body property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyField {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Allow-list of response fields retained after execution; `KeepAll`
/// means no filter is configured and everything passes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFilter {
    KeepAll,
    Keys(Vec<String>),
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self::KeepAll
    }
}

impl Action {
    /// Names of required query/path parameters, in declaration order.
    pub fn required_parameter_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Names of required body fields, in declaration order. Empty when the
    /// action has no body schema.
    pub fn required_body_field_names(&self) -> Vec<&str> {
        self.request_body
            .as_ref()
            .map(|b| b.required.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Find a parameter or body-field definition by name. Used by the
    /// correction loop to phrase an ask for a missing argument.
    pub fn describe_parameter(&self, name: &str) -> Option<ParameterAsk<'_>> {
        if let Some(p) = self.parameters.iter().find(|p| p.name == name) {
            return Some(ParameterAsk {
                name: &p.name,
                description: p.description.as_deref(),
            });
        }
        self.request_body.as_ref().and_then(|body| {
            body.properties
                .iter()
                .find(|f| f.name == name)
                .map(|f| ParameterAsk {
                    name: &f.name,
                    description: f.description.as_deref(),
                })
        })
    }

    /// Parse an action from registry-shape JSON blobs. Malformed sub-shapes
    /// degrade (non-array `required` or `parameters` become empty) rather
    /// than failing the whole action.
    pub fn from_record(
        id: i64,
        name: &str,
        description: &str,
        path: Option<&str>,
        method: Option<&str>,
        parameters: &Value,
        request_body: &Value,
        response_schema: Option<Value>,
        key_filter: &Value,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            path: path.map(ToString::to_string),
            method: method.map(ToString::to_string),
            parameters: parse_parameters(parameters),
            request_body: parse_body_schema(request_body),
            response_schema,
            key_filter: parse_key_filter(key_filter),
        }
    }
}

/// Name + description of a parameter, borrowed from its definition.
#[derive(Debug, Clone, Copy)]
pub struct ParameterAsk<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
}

// ── Registry-boundary parsing ────────────────────────────────────

fn parse_parameters(value: &Value) -> Vec<ParameterDef> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let location = match item.get("in").and_then(Value::as_str) {
                Some("path") => ParameterLocation::Path,
                _ => ParameterLocation::Query,
            };
            Some(ParameterDef {
                name,
                description: item
                    .get("description")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                required: item.get("required").and_then(Value::as_bool).unwrap_or(false),
                location,
            })
        })
        .collect()
}

fn parse_body_schema(value: &Value) -> Option<BodySchema> {
    let obj = value.as_object()?;
    // A non-list `required` degrades to an empty list, never an error.
    let required = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let properties = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| BodyField {
                    name: name.clone(),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(ToString::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(BodySchema {
        required,
        properties,
    })
}

fn parse_key_filter(value: &Value) -> KeyFilter {
    match value.as_array() {
        Some(items) => KeyFilter::Keys(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
        ),
        None => KeyFilter::KeepAll,
    }
}

// ── AuthContext ──────────────────────────────────────────────────

/// Per-action auth material resolved from the owning API definition.
/// Read-only during execution.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Base URL of the API host (e.g. `https://api.example.com`).
    pub api_host: Option<String>,
    /// Header name the API expects the credential in.
    pub auth_header_name: String,
    /// Scheme prefix for the credential (e.g. `Bearer`), if any.
    pub auth_scheme: Option<String>,
    /// Per-call key supplied by the end user.
    pub user_api_key: Option<String>,
    /// Key stored with the organization; fallback when no per-call key.
    pub org_api_key: Option<String>,
    /// Fixed headers declared on the API definition.
    pub fixed_headers: Vec<(String, String)>,
}

impl AuthContext {
    /// The credential to send: the per-call key, else the org key.
    pub fn effective_key(&self) -> Option<&str> {
        self.user_api_key
            .as_deref()
            .or(self.org_api_key.as_deref())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_action() -> Action {
        Action::from_record(
            1,
            "get_weather",
            "Get the weather for a city",
            Some("/weather"),
            Some("get"),
            &json!([
                {"name": "city", "in": "query", "required": true, "description": "City name"},
                {"name": "units", "in": "query", "required": false}
            ]),
            &json!({
                "required": ["date"],
                "properties": {"date": {"type": "string", "description": "ISO date"}}
            }),
            None,
            &json!(null),
        )
    }

    #[test]
    fn required_parameter_names_preserve_declaration_order() {
        let action = Action::from_record(
            1,
            "a",
            "",
            None,
            None,
            &json!([
                {"name": "b", "required": true},
                {"name": "a", "required": true},
                {"name": "c", "required": false}
            ]),
            &json!(null),
            None,
            &json!(null),
        );
        assert_eq!(action.required_parameter_names(), vec!["b", "a"]);
    }

    #[test]
    fn required_body_fields_empty_without_body_schema() {
        let action = Action::from_record(
            1,
            "a",
            "",
            None,
            None,
            &json!([]),
            &json!(null),
            None,
            &json!(null),
        );
        assert!(action.required_body_field_names().is_empty());
    }

    #[test]
    fn non_list_required_degrades_to_empty() {
        let action = Action::from_record(
            1,
            "a",
            "",
            None,
            None,
            &json!([]),
            &json!({"required": "city", "properties": {}}),
            None,
            &json!(null),
        );
        assert!(action.required_body_field_names().is_empty());
    }

    #[test]
    fn non_array_parameters_degrade_to_empty() {
        let action = Action::from_record(
            1,
            "a",
            "",
            None,
            None,
            &json!({"oops": true}),
            &json!(null),
            None,
            &json!(null),
        );
        assert!(action.parameters.is_empty());
    }

    #[test]
    fn key_filter_parses_list_and_sentinel() {
        assert_eq!(parse_key_filter(&json!(null)), KeyFilter::KeepAll);
        assert_eq!(
            parse_key_filter(&json!(["temperature"])),
            KeyFilter::Keys(vec!["temperature".into()])
        );
    }

    #[test]
    fn describe_parameter_finds_query_and_body_definitions() {
        let action = weather_action();
        let ask = action.describe_parameter("city").unwrap();
        assert_eq!(ask.description, Some("City name"));
        let ask = action.describe_parameter("date").unwrap();
        assert_eq!(ask.description, Some("ISO date"));
        assert!(action.describe_parameter("nope").is_none());
    }

    #[test]
    fn path_location_parsed_from_in_field() {
        let action = Action::from_record(
            1,
            "a",
            "",
            None,
            None,
            &json!([{"name": "id", "in": "path", "required": true}]),
            &json!(null),
            None,
            &json!(null),
        );
        assert_eq!(action.parameters[0].location, ParameterLocation::Path);
    }

    #[test]
    fn effective_key_prefers_user_key() {
        let auth = AuthContext {
            user_api_key: Some("user".into()),
            org_api_key: Some("org".into()),
            ..AuthContext::default()
        };
        assert_eq!(auth.effective_key(), Some("user"));

        let auth = AuthContext {
            org_api_key: Some("org".into()),
            ..AuthContext::default()
        };
        assert_eq!(auth.effective_key(), Some("org"));
    }
}
