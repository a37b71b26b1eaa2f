//! Runtime configuration loaded from the environment

use serde::{Deserialize, Serialize};

use crate::types::{SisconError, SisconResult};

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SisconConfig {
    /// PostgreSQL connection string; `None` runs on in-memory storage
    pub database_url: Option<String>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    pub max_connections: u32,
}

impl Default for SisconConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            log_filter: "info".to_string(),
            log_json: false,
            max_connections: 5,
        }
    }
}

impl SisconConfig {
    /// Load from `SISCON_*` variables, falling back to `DATABASE_URL`
    pub fn from_env() -> SisconResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> SisconResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        let mut fallback_url = None;

        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                "SISCON_DATABASE_URL" => config.database_url = non_empty(value),
                "DATABASE_URL" => fallback_url = non_empty(value),
                "SISCON_LOG" => {
                    if let Some(filter) = non_empty(value) {
                        config.log_filter = filter;
                    }
                }
                "SISCON_LOG_JSON" => config.log_json = parse_flag("SISCON_LOG_JSON", &value)?,
                "SISCON_DB_MAX_CONNECTIONS" => {
                    config.max_connections = value.trim().parse().map_err(|_| {
                        SisconError::Configuration(format!(
                            "SISCON_DB_MAX_CONNECTIONS must be a positive integer, got {:?}",
                            value
                        ))
                    })?;
                    if config.max_connections == 0 {
                        return Err(SisconError::Configuration(
                            "SISCON_DB_MAX_CONNECTIONS must be at least 1".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }

        if config.database_url.is_none() {
            config.database_url = fallback_url;
        }
        Ok(config)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_flag(key: &str, value: &str) -> SisconResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SisconError::Configuration(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}
