// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_POOL_SIZE: usize = 3;
pub const DEFAULT_REDIS_CONNECTION_TIMEOUT: Duration = Duration::from_millis(3000);

const REDIS_URL_ENV: &str = "REDIS_URL";

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_REDIS_CONNECTION_TIMEOUT.as_millis() as u64
}

/// Connection settings consumed by [`crate::pool::RedisPool::connect`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Logical database selected on every new connection
    #[serde(default)]
    pub db: i64,

    /// Maximum number of concurrently open connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            db: 0,
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Loads config from YAML string
    pub fn from_yaml(yaml_content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads config from file, or returns default if file doesn't exist.
    /// `REDIS_URL` overrides whatever URL was loaded.
    pub fn from_file_or_default(path: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(yaml_content) => {
                tracing::info!("Loading store config from {}", path);
                Self::from_yaml(&yaml_content)?
            }
            Err(_) => {
                tracing::info!("No {} found, using default store config", path);
                Self::default()
            }
        };

        Ok(config.with_env_overrides())
    }

    /// Builds config from an optional JSON blob, as passed to adapters
    pub fn from_value(config: Option<Value>) -> anyhow::Result<Self> {
        let config = match config {
            Some(value) => serde_json::from_value::<Self>(value)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(REDIS_URL_ENV)
            && !url.is_empty()
        {
            tracing::debug!(redis_url = %url, "Using REDIS_URL from environment");
            self.redis_url = url;
        }
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.pool_size > 0, "pool_size must be at least 1");
        anyhow::ensure!(self.db >= 0, "db must not be negative, got {}", self.db);
        anyhow::ensure!(
            self.connect_timeout_ms > 0,
            "connect_timeout_ms must be greater than zero"
        );
        Ok(())
    }
}
