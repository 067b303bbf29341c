//! Config loading and persistence.
//!
//! A single TOML file under the config dir, with env overrides applied after
//! load so deployments can tweak without editing files.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the aggregation engine listens on.
    pub listen_addr: String,
    /// Override for the station data directory; `None` resolves via XDG.
    pub data_dir: Option<PathBuf>,
    /// Staleness bound before a station record is purged.
    pub ttl_ms: u64,
    /// Expiry sweep period. Much finer than the TTL to bound staleness.
    pub sweep_interval_ms: u64,
    /// Bind attempts before startup is abandoned.
    pub bind_retries: u32,
    /// Fixed backoff between bind attempts.
    pub bind_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4567".to_string(),
            data_dir: None,
            ttl_ms: 30_000,
            sweep_interval_ms: 250,
            bind_retries: 5,
            bind_backoff_ms: 500,
        }
    }
}

impl Config {
    /// Resolve the effective data directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(paths::data_dir)
    }
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

/// Load the config file if present, fall back to defaults, then apply env
/// overrides.
pub fn load() -> Result<Config, ConfigError> {
    let path = config_path();
    let mut config = if path.exists() {
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load, logging and defaulting on failure instead of propagating.
pub fn load_or_default() -> Config {
    match load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("config load failed, using defaults: {err}");
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(addr) = std::env::var("STATIOND_LISTEN")
        && !addr.trim().is_empty()
    {
        config.listen_addr = addr;
    }
    if let Some(ttl) = env_u64("STATIOND_TTL_MS") {
        config.ttl_ms = ttl;
    }
    if let Some(interval) = env_u64("STATIOND_SWEEP_INTERVAL_MS") {
        config.sweep_interval_ms = interval;
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).expect("serialize config");
        let parsed: Config = toml::from_str(&text).expect("parse config");
        assert_eq!(parsed.listen_addr, config.listen_addr);
        assert_eq!(parsed.ttl_ms, config.ttl_ms);
        assert_eq!(parsed.sweep_interval_ms, config.sweep_interval_ms);
    }

    #[test]
    fn partial_toml_uses_defaults_for_missing_fields() {
        let parsed: Config = toml::from_str("ttl_ms = 5000").expect("parse config");
        assert_eq!(parsed.ttl_ms, 5_000);
        assert_eq!(parsed.listen_addr, Config::default().listen_addr);
        assert_eq!(parsed.sweep_interval_ms, Config::default().sweep_interval_ms);
    }
}
