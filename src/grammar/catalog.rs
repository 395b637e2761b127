//! Grammars shipped with the crate.

use super::*;

/// Names of the built-in grammars.
pub const BUILTIN_GRAMMARS: &[&str] = &["syslog", "static_route", "dns", "nat_masquerade"];

fn document(name: &str) -> Option<&'static str> {
    let json = match name {
        "syslog" => include_str!("catalog/syslog.json"),
        "static_route" => include_str!("catalog/static_route.json"),
        "dns" => include_str!("catalog/dns.json"),
        "nat_masquerade" => include_str!("catalog/nat_masquerade.json"),
        _ => return None,
    };
    Some(json)
}

/// Returns the document of a built-in grammar.
pub fn spec(name: &str) -> Result<GrammarSpec, EngineError> {
    let json = document(name).ok_or_else(|| {
        EngineError::InvalidGrammar(format!("no built-in grammar named '{name}'"))
    })?;
    GrammarSpec::from_json(json)
}

/// Compiles a built-in grammar.
pub fn grammar(name: &str) -> Result<Grammar, EngineError> {
    Grammar::new(spec(name)?)
}
