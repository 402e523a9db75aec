//! Command name extraction
//!
//! Command invocations carry the command in `metadata.command`. Older
//! records only have free text like `command: git status`; for those the
//! command is parsed out of the content.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Event;

/// Event type written by shell integrations
pub const CLI_USAGE_EVENT: &str = "cli_usage";

/// `command` followed by `:` or `=`, optional quotes, then the first token
static COMMAND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)command["\s]*[:=]["\s]*([^"\s]+)"#).expect("command pattern is valid")
});

/// First whitespace-delimited token, lower-cased
pub fn normalize_command(raw: &str) -> Option<String> {
    raw.split_whitespace()
        .next()
        .map(|token| token.to_lowercase())
}

/// Parse a command name out of free text
pub fn extract_command(content: &str) -> Option<String> {
    COMMAND_PATTERN
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| normalize_command(m.as_str()))
}

/// Whether an event looks like a command invocation at all
pub fn is_command_event(event: &Event) -> bool {
    event.event_type == CLI_USAGE_EVENT
        || event.metadata_str("command").is_some()
        || event
            .content
            .as_deref()
            .map(|c| c.to_lowercase().contains("command"))
            .unwrap_or(false)
}

/// Normalized command of an invocation event, explicit metadata first.
/// A blank metadata command falls back to the content.
pub fn command_of(event: &Event) -> Option<String> {
    event
        .metadata_str("command")
        .and_then(normalize_command)
        .or_else(|| event.content.as_deref().and_then(extract_command))
}
