//! Parameter auditor: which required arguments did the AI leave out?

use super::Action;
use serde_json::{Map, Value};

/// Required parameter names absent from the AI-supplied argument set.
///
/// Query/path parameters come first, then body fields, each in schema
/// declaration order. A name required in both places is reported once.
/// Pure and deterministic; extra unknown argument keys are ignored.
pub fn missing_required_args(action: &Action, args: &Map<String, Value>) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    let required = action
        .required_parameter_names()
        .into_iter()
        .chain(action.required_body_field_names());
    for name in required {
        if !args.contains_key(name) && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    missing
}
