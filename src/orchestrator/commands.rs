//! Rendering and parsing of the `Commands:` block embedded in assistant
//! proposal turns.
//!
//! The block is the durable record of what was proposed: when the transient
//! cache has lost the pending batch, the orchestrator re-reads the last
//! assistant turn and reconstructs the batch from these lines.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Heading preceding the command lines in a proposal turn.
pub const COMMANDS_HEADING: &str = "Commands:";

/// One proposed invocation as written into a proposal turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub args: Map<String, Value>,
}

fn command_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_-]+)\((.*)\)$").unwrap())
}

/// Render a proposal turn's `Commands:` block, one `name({json})` line per
/// proposed invocation.
pub fn render_block(commands: &[CommandLine]) -> String {
    let mut out = String::from(COMMANDS_HEADING);
    for command in commands {
        out.push('\n');
        out.push_str(&command.name);
        out.push('(');
        out.push_str(&Value::Object(command.args.clone()).to_string());
        out.push(')');
    }
    out
}

/// Extract the proposed invocations from an assistant turn's content.
/// Returns an empty list when no `Commands:` block is present; lines that do
/// not parse are skipped rather than failing the whole turn.
pub fn parse_block(content: &str) -> Vec<CommandLine> {
    let Some(offset) = content.find(COMMANDS_HEADING) else {
        return Vec::new();
    };
    let block = &content[offset + COMMANDS_HEADING.len()..];

    let mut commands = Vec::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(captures) = command_regex().captures(line) else {
            continue;
        };
        let name = captures[1].to_string();
        let raw_args = captures[2].trim();
        let args = if raw_args.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(raw_args) {
                Ok(Value::Object(map)) => map,
                _ => continue,
            }
        };
        commands.push(CommandLine { name, args });
    }
    commands
}
