//! Predefined device dialects.
//!
//! Factory functions returning [`DeviceDialect`] instances for supported router
//! families, pre-configured with their prompts, pagination markers, error
//! messages and administrator login.

use crate::device::{DeviceDialect, DialectSpec, Elevation, InputRule};
use crate::error::EngineError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Built-in dialect names supported by this crate.
pub const BUILTIN_DIALECTS: &[&str] = &["rtx"];

/// Metadata for a built-in dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DialectMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub dialect_version: String,
}

fn metadata_for(name: &str) -> Option<DialectMetadata> {
    let meta = match name {
        "rtx" => DialectMetadata {
            name: "rtx".to_string(),
            vendor: "Yamaha".to_string(),
            family: "RTX".to_string(),
            dialect_version: "1.0.0".to_string(),
        },
        _ => return None,
    };
    Some(meta)
}

/// Returns names of all built-in dialects.
pub fn available_dialects() -> &'static [&'static str] {
    BUILTIN_DIALECTS
}

/// Returns metadata for one dialect by name (case-insensitive).
pub fn dialect_metadata(name: &str) -> Result<DialectMetadata, EngineError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| EngineError::DialectNotFound(name.to_string()))
}

/// Creates a built-in dialect by name (case-insensitive).
pub fn by_name(name: &str) -> Result<DeviceDialect, EngineError> {
    match name.to_ascii_lowercase().as_str() {
        "rtx" => rtx(),
        _ => Err(EngineError::DialectNotFound(name.to_string())),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Returns the description of the Yamaha RTX dialect.
pub fn rtx_spec() -> DialectSpec {
    DialectSpec {
        name: "rtx".to_string(),
        // Prompt
        user_prompts: strings(&[r"^(\[[^\]\r\n]*\]|[\w.-]+)?\s?>\s*$"]),
        admin_prompts: strings(&[r"^(\[[^\]\r\n]*\]|[\w.-]+)?\s?#\s*$"]),
        // More regex
        more_patterns: strings(&[r"---MORE---", r"--More--", r"---つづく---"]),
        more_answer: " ".to_string(),
        // Error regex, anchored so configuration text is never taken for an error
        error_patterns: strings(&[
            r"^\s*Error:",
            r"^\s*Command failed:",
            r"^\s*Invalid parameter",
            r"^\s*Permission denied",
            r"^\s*Connection timeout",
            r"^\s*\S+( \S+)? already exists",
            r"^\s*\S+( \S+)? not found",
        ]),
        // Ignore errors
        absent_patterns: strings(&[r"not found"]),
        // Write
        input_rules: vec![InputRule {
            pattern: r"(?i)save .*\(y/n\)".to_string(),
            answer: "N".to_string(),
        }],
        elevation: Elevation {
            command: "administrator".to_string(),
            password_prompt: r"(?i)password:\s*$".to_string(),
            failure_patterns: strings(&[r"incorrect", r"failed", r"invalid"]),
        },
        init_commands: strings(&[
            "console character en.ascii",
            "console lines infinity",
            "console columns {width}",
        ]),
        exit_command: "exit".to_string(),
        save_command: "save".to_string(),
        terminator: "\r".to_string(),
        continuation: r"^\s*(\d|=)".to_string(),
        query_prefixes: strings(&["show "]),
        config_prefixes: strings(&["show config"]),
        sensitive_patterns: strings(&[
            r"\bpassword\b",
            r"\bpre-shared-key\b",
            r"\bsecret\b",
            r"\bcommunity\b",
        ]),
    }
}

/// Returns a `DeviceDialect` configured for Yamaha RTX routers.
pub fn rtx() -> Result<DeviceDialect, EngineError> {
    DeviceDialect::new(rtx_spec())
}
