//! Session configuration.
//!
//! Defaults match the editor's interactive behaviour; `from_env` lets a
//! binary override them without code changes.

use std::time::Duration;

use tracing::warn;

/// Quiet period after the last change before an automatic save.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Number of undo steps kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub save_debounce: Duration,
    pub history_limit: usize,
    /// Register the draft with the query engine as soon as the session opens.
    pub register_on_open: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            history_limit: DEFAULT_HISTORY_LIMIT,
            register_on_open: true,
        }
    }
}

impl SessionConfig {
    /// Reads `SEMDRAFT_SAVE_DEBOUNCE_MS` and `SEMDRAFT_HISTORY_LIMIT`,
    /// keeping the default for anything absent or malformed.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = SessionConfig::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "SEMDRAFT_SAVE_DEBOUNCE_MS") {
            config.save_debounce = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, "SEMDRAFT_HISTORY_LIMIT") {
            config.history_limit = limit;
        }
        config
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(SessionConfig::from_lookup(lookup(&[])), SessionConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("SEMDRAFT_SAVE_DEBOUNCE_MS", "500"),
            ("SEMDRAFT_HISTORY_LIMIT", "25"),
        ]));
        assert_eq!(config.save_debounce, Duration::from_millis(500));
        assert_eq!(config.history_limit, 25);
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = SessionConfig::from_lookup(lookup(&[("SEMDRAFT_HISTORY_LIMIT", "lots")]));
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }
}
