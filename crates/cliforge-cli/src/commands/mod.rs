//! Command handlers for the builtin groups and catalog operations.

pub mod cache;
pub mod config_cmd;
pub mod operation;
pub mod workflow;

use clap::ArgMatches;
use serde_json::Value;
use std::collections::HashMap;

/// Collect `key=value` pairs into workflow flags; values parse as JSON
/// where possible and fall back to strings.
pub fn parse_flag_pairs(matches: &ArgMatches, id: &str) -> HashMap<String, Value> {
    let mut flags = HashMap::new();
    if let Some(values) = matches.get_many::<String>(id) {
        for pair in values {
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, value),
                None => (pair.as_str(), "true"),
            };
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            flags.insert(key.to_string(), value);
        }
    }
    flags
}
