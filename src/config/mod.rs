use crate::{constants, HubError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Tunables for the coordination core itself.
///
/// `data_dir = None` keeps every singleton's storage in memory; used by the
/// test suites and available in deployments via `HUB_DATA_DIR=:memory:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub data_dir: Option<PathBuf>,
    pub chat_retention: usize,
    pub claim_stale_secs: i64,
    pub default_lock_ttl_ms: i64,
    pub accomplishment_keywords: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            chat_retention: constants::CHAT_RETENTION_LIMIT,
            claim_stale_secs: constants::CLAIM_STALE_SECS,
            default_lock_ttl_ms: constants::DEFAULT_LOCK_TTL_MS,
            accomplishment_keywords: constants::DEFAULT_ACCOMPLISHMENT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file
        match dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("API_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| HubError::Configuration("API_PORT must be a valid port".to_string()))?;
        if port == 0 {
            return Err(HubError::Configuration(
                "API_PORT cannot be 0".to_string(),
            ));
        }

        let data_dir = match env::var("HUB_DATA_DIR") {
            Ok(v) if v == ":memory:" => None,
            Ok(v) if v.trim().is_empty() => {
                return Err(HubError::Configuration(
                    "HUB_DATA_DIR cannot be blank".to_string(),
                ))
            }
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(PathBuf::from("./data")),
        };

        let chat_retention: usize = env::var("CHAT_RETENTION_LIMIT")
            .unwrap_or_else(|_| constants::CHAT_RETENTION_LIMIT.to_string())
            .parse()
            .map_err(|_| {
                HubError::Configuration("CHAT_RETENTION_LIMIT must be a number".to_string())
            })?;
        if chat_retention < 10 {
            return Err(HubError::Configuration(
                "CHAT_RETENTION_LIMIT must be at least 10".to_string(),
            ));
        }

        let claim_stale_secs: i64 = env::var("CLAIM_STALE_SECS")
            .unwrap_or_else(|_| constants::CLAIM_STALE_SECS.to_string())
            .parse()
            .map_err(|_| {
                HubError::Configuration("CLAIM_STALE_SECS must be a number".to_string())
            })?;
        if claim_stale_secs <= 0 {
            return Err(HubError::Configuration(
                "CLAIM_STALE_SECS must be positive".to_string(),
            ));
        }

        let default_lock_ttl_ms: i64 = env::var("DEFAULT_LOCK_TTL_MS")
            .unwrap_or_else(|_| constants::DEFAULT_LOCK_TTL_MS.to_string())
            .parse()
            .map_err(|_| {
                HubError::Configuration("DEFAULT_LOCK_TTL_MS must be a number".to_string())
            })?;
        if default_lock_ttl_ms <= 0 {
            return Err(HubError::Configuration(
                "DEFAULT_LOCK_TTL_MS must be positive".to_string(),
            ));
        }

        // The accomplishment keyword set is heuristic and deployment-specific
        let accomplishment_keywords: Vec<String> = match env::var("ACCOMPLISHMENT_KEYWORDS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => constants::DEFAULT_ACCOMPLISHMENT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        if accomplishment_keywords.is_empty() {
            return Err(HubError::Configuration(
                "ACCOMPLISHMENT_KEYWORDS cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            api: ApiConfig { host, port },
            hub: HubConfig {
                data_dir,
                chat_retention,
                claim_stale_secs,
                default_lock_ttl_ms,
                accomplishment_keywords,
            },
        })
    }

    /// In-memory configuration used by the test suites.
    pub fn for_tests() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            hub: HubConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests;
