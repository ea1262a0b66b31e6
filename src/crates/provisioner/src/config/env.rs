//! Environment variable expansion for configuration values
//!
//! String values may reference `${VAR}` or `${VAR:default}`. Unset variables
//! without a default expand to the empty string.

use regex::Regex;
use std::env;

/// Expand every string in a TOML tree in place
pub fn expand_variables(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        toml::Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                expand_variables(v);
            }
        }
        toml::Value::Array(items) => {
            for item in items.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// Expand `${VAR:default}` references in a string
///
/// Returns `None` when the string contains no reference.
pub fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;

    let expanded = re.replace_all(s, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&cap[1]).unwrap_or_else(|_| default_value.to_string())
    });

    Some(expanded.into_owned())
}
