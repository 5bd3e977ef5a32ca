//! CLI configuration.
//!
//! Precedence, lowest first: built-in defaults, an optional JSON file,
//! `DAM_`-prefixed environment variables, command-line flags.

use std::{env, fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dam_core::events::DEFAULT_EVENT_CAPACITY;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MarketConfig {
    /// Operator share used when deploying a market.
    pub share_percent: u32,
    /// Where market and account state is persisted between invocations.
    pub state_path: PathBuf,
    /// Reject share percents above 100 at initialization.
    pub strict_share_percent: bool,
    pub event_capacity: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            share_percent: 50,
            state_path: PathBuf::from("dam.state.json"),
            strict_share_percent: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl MarketConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from environment variables:
    /// - DAM_SHARE_PERCENT
    /// - DAM_STATE_PATH
    /// - DAM_STRICT_SHARE_PERCENT (true/false/1/0)
    /// - DAM_EVENT_CAPACITY
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("DAM_SHARE_PERCENT") {
            self.share_percent = v.parse().context("DAM_SHARE_PERCENT")?;
        }
        if let Some(v) = var("DAM_STATE_PATH") {
            self.state_path = PathBuf::from(v);
        }
        if let Some(v) = var("DAM_STRICT_SHARE_PERCENT") {
            self.strict_share_percent = parse_bool(&v).context("DAM_STRICT_SHARE_PERCENT")?;
        }
        if let Some(v) = var("DAM_EVENT_CAPACITY") {
            self.event_capacity = v.parse().context("DAM_EVENT_CAPACITY")?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_overrides_file_values() {
        let mut config = MarketConfig::default();
        let vars: HashMap<&str, &str> = [
            ("DAM_SHARE_PERCENT", "25"),
            ("DAM_STATE_PATH", "/var/lib/dam/state.json"),
            ("DAM_STRICT_SHARE_PERCENT", "yes"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.share_percent, 25);
        assert!(config.strict_share_percent);
        assert_eq!(config.state_path, PathBuf::from("/var/lib/dam/state.json"));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut config = MarketConfig::default();
        let err = config
            .apply_env(|key| (key == "DAM_SHARE_PERCENT").then(|| "half".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DAM_SHARE_PERCENT"));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.json");
        fs::write(&path, r#"{"share_percent": 10}"#).unwrap();
        let mut config: MarketConfig = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        config.apply_env(|_| None).unwrap();
        assert_eq!(config.share_percent, 10);
        assert_eq!(config.state_path, PathBuf::from("dam.state.json"));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
