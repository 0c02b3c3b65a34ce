//! Request builder: compiles an action, its argument set, and auth context
//! into a fully-specified outbound HTTP request.
//!
//! Pure transformation: no network I/O happens here, so every rule is unit
//! testable without a live endpoint.

pub mod execute;

use crate::schema::{Action, AuthContext, ParameterLocation};
use serde_json::{Map, Value};

/// A fully-specified outbound HTTP request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    /// JSON body, omitted for methods with no body semantics.
    pub body: Option<String>,
}

/// Why a request could not be built. `MissingApiHost` is a configuration
/// error scoped to the offending batch item, not the whole request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("no API host found - please set an API host on the API settings page")]
    MissingApiHost,
    #[error("action declares no HTTP method")]
    MissingMethod,
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("path parameter {{{0}}} has no value")]
    MissingPathParameter(String),
    #[error("duplicate header: {0}")]
    DuplicateHeader(String),
}

/// Build the outbound request for one action invocation.
pub fn build(
    action: &Action,
    args: &Map<String, Value>,
    auth: &AuthContext,
) -> Result<PreparedRequest, BuildError> {
    let host = auth
        .api_host
        .as_deref()
        .map(|h| h.trim_end_matches('/'))
        .filter(|h| !h.is_empty())
        .ok_or(BuildError::MissingApiHost)?;

    let method = parse_method(action.method.as_deref())?;

    let (path, consumed) = substitute_path(action, args)?;
    let query = query_string(action, args, &consumed);
    let url = if query.is_empty() {
        format!("{host}{path}")
    } else {
        format!("{host}{path}?{query}")
    };

    let body = request_body(action, args, &method);
    let headers = assemble_headers(auth, body.is_some())?;

    Ok(PreparedRequest {
        url,
        method,
        headers,
        body,
    })
}

fn parse_method(raw: Option<&str>) -> Result<reqwest::Method, BuildError> {
    let raw = raw.map(str::trim).filter(|m| !m.is_empty());
    let Some(raw) = raw else {
        return Err(BuildError::MissingMethod);
    };
    let upper = raw.to_uppercase();
    reqwest::Method::from_bytes(upper.as_bytes())
        .map_err(|_| BuildError::InvalidMethod(raw.to_string()))
}

/// Substitute `{name}` placeholders from path-located arguments. Returns the
/// substituted path and the set of argument names consumed by it.
fn substitute_path(
    action: &Action,
    args: &Map<String, Value>,
) -> Result<(String, Vec<String>), BuildError> {
    let mut path = action.path.clone().unwrap_or_default();
    let mut consumed = Vec::new();

    for param in &action.parameters {
        if param.location != ParameterLocation::Path {
            continue;
        }
        let placeholder = format!("{{{}}}", param.name);
        if !path.contains(&placeholder) {
            continue;
        }
        let value = args
            .get(&param.name)
            .ok_or_else(|| BuildError::MissingPathParameter(param.name.clone()))?;
        path = path.replace(&placeholder, &plain_value(value));
        consumed.push(param.name.clone());
    }

    // An unresolved placeholder left in the path is an error, whether it
    // came from an undeclared parameter or a missing argument.
    if let Some(start) = path.find('{') {
        let rest = &path[start + 1..];
        let name = rest.split('}').next().unwrap_or(rest);
        return Err(BuildError::MissingPathParameter(name.to_string()));
    }

    Ok((path, consumed))
}

/// Percent-encoded query string from query-located arguments not consumed by
/// path substitution.
fn query_string(action: &Action, args: &Map<String, Value>, consumed: &[String]) -> String {
    let mut pairs = Vec::new();
    for param in &action.parameters {
        if param.location != ParameterLocation::Query {
            continue;
        }
        if consumed.iter().any(|c| c == &param.name) {
            continue;
        }
        if let Some(value) = args.get(&param.name) {
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(&param.name),
                urlencoding::encode(&plain_value(value))
            ));
        }
    }
    pairs.join("&")
}

/// JSON body restricted to body-schema fields; `None` for bodyless methods
/// or when no declared field is present in the arguments.
fn request_body(
    action: &Action,
    args: &Map<String, Value>,
    method: &reqwest::Method,
) -> Option<String> {
    if matches!(*method, reqwest::Method::GET | reqwest::Method::HEAD) {
        return None;
    }
    let schema = action.request_body.as_ref()?;

    let mut field_names: Vec<&str> = schema.properties.iter().map(|f| f.name.as_str()).collect();
    for name in &schema.required {
        if !field_names.contains(&name.as_str()) {
            field_names.push(name);
        }
    }

    let mut body = Map::new();
    for name in field_names {
        if let Some(value) = args.get(name) {
            body.insert(name.to_string(), value.clone());
        }
    }
    if body.is_empty() {
        return None;
    }
    Some(Value::Object(body).to_string())
}

fn assemble_headers(
    auth: &AuthContext,
    has_body: bool,
) -> Result<Vec<(String, String)>, BuildError> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for (name, value) in &auth.fixed_headers {
        if headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
            return Err(BuildError::DuplicateHeader(name.clone()));
        }
        headers.push((name.clone(), value.clone()));
    }

    if let Some(key) = auth.effective_key() {
        let name = if auth.auth_header_name.is_empty() {
            "Authorization"
        } else {
            auth.auth_header_name.as_str()
        };
        if headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
            return Err(BuildError::DuplicateHeader(name.to_string()));
        }
        let value = match auth.auth_scheme.as_deref().filter(|s| !s.is_empty()) {
            Some(scheme) => format!("{scheme} {key}"),
            None => key.to_string(),
        };
        headers.push((name.to_string(), value));
    }

    if has_body
        && !headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case("content-type"))
    {
        headers.push(("Content-Type".into(), "application/json".into()));
    }

    Ok(headers)
}

/// Render an argument for URL use: strings verbatim, everything else as JSON.
fn plain_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────
