//! Runtime configuration for the binaries, resolved from the environment.
//!
//! | Variable           | Meaning                                  | Default              |
//! |--------------------|------------------------------------------|----------------------|
//! | `FUNDING_STATE`    | chain state file                         | `funding-state.json` |
//! | `FUNDING_LOG_JSON` | emit JSON log lines                      | `false`              |
//! | `FUNDING_NOW`      | fixed block timestamp (unix seconds)     | wall clock           |
//! | `RUST_LOG`         | tracing filter                           | `warn`               |

use std::env;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ledger::Timestamp;

pub const DEFAULT_STATE_PATH: &str = "funding-state.json";
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a boolean, got {value:?}")]
    InvalidBool { name: &'static str, value: String },
    #[error("{name} must be a unix timestamp, got {value:?}")]
    InvalidTimestamp { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub state_path: PathBuf,
    pub log_json: bool,
    pub fixed_now: Option<Timestamp>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            log_json: false,
            fixed_now: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        if let Some(path) = lookup("FUNDING_STATE").filter(|v| !v.trim().is_empty()) {
            config.state_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("FUNDING_LOG_JSON") {
            config.log_json = parse_bool("FUNDING_LOG_JSON", &raw)?;
        }
        if let Some(raw) = lookup("FUNDING_NOW") {
            let now = raw
                .trim()
                .parse::<Timestamp>()
                .map_err(|_| ConfigError::InvalidTimestamp {
                    name: "FUNDING_NOW",
                    value: raw.clone(),
                })?;
            config.fixed_now = Some(now);
        }
        Ok(config)
    }

    /// Block timestamp for the next transaction.
    pub fn now(&self) -> Timestamp {
        self.fixed_now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }
}

pub fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine readable.
pub fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("warning: tracing already initialised: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.state_path, PathBuf::from("funding-state.json"));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("FUNDING_STATE", "/tmp/ledger.json"),
            ("FUNDING_LOG_JSON", "Yes"),
            ("FUNDING_NOW", " 1700000000 "),
        ]))
        .unwrap();
        assert_eq!(config.state_path, PathBuf::from("/tmp/ledger.json"));
        assert!(config.log_json);
        assert_eq!(config.now(), 1_700_000_000);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("FUNDING_LOG_JSON", "maybe")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "FUNDING_LOG_JSON must be a boolean, got \"maybe\""
        );
        assert!(matches!(
            Config::from_lookup(lookup(&[("FUNDING_NOW", "yesterday")])),
            Err(ConfigError::InvalidTimestamp { .. })
        ));
    }
}
