// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ipsecctl configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! command-line flags.

use dpu_ipsec::connection::split_host_port;
use dpu_ipsec::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection and logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// IPsec service address (`host:port`).
    #[serde(default = "default_address")]
    pub address: String,

    /// TLS credential bundle: `cert:key:ca` or a directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<String>,

    /// Per-call deadline (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// TCP connect and TLS handshake timeout (seconds).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Certificate name to verify instead of the address host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> String {
    "localhost:50151".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            tls: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            server_name: None,
            log_level: default_log_level(),
        }
    }
}

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        split_host_port(&self.address).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be > 0".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs must be > 0".into(),
            ));
        }
        if matches!(&self.tls, Some(tls) if tls.trim().is_empty()) {
            return Err(ConfigError::Invalid("tls must not be empty".into()));
        }
        if matches!(&self.server_name, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::Invalid("server_name must not be empty".into()));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level must not be empty".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Example written by `gen-config`.
    pub fn example() -> Self {
        Self {
            address: "10.0.0.1:50151".into(),
            tls: Some("/etc/dpu/tls".into()),
            ..Default::default()
        }
    }

    /// Deadline applied to each AddSA / DelSA call.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let options = ConnectOptions::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        match &self.server_name {
            Some(name) => options.with_server_name(name.clone()),
            None => options,
        }
    }
}
