// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Membership configuration.
//!
//! Configuration sources in priority order (lowest to highest):
//! 1. Code defaults
//! 2. System config file at `/opt/ares/etc/membership.toml`
//! 3. TOML file from the `ARES_CONFIG_PATH` environment variable
//! 4. Environment variables (`ARES_PORT`, `ARES_CLUSTER_*`, `ARES_COORDINATION_*`,
//!    `ARES_SCHEMA_SYNC_*`)
//!
//! Example:
//! ```toml
//! port = 9374
//!
//! [cluster]
//! cluster_name = "c1"
//! instance_name = "n1"
//!
//! [coordination]
//! endpoints = "http://etcd1:2379,http://etcd2:2379"
//! timeout_secs = 10
//! ```

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::instance::ClusterIdentity;

/// ENV pointing at an optional TOML configuration file
const CONFIG_PATH_ENV: &str = "ARES_CONFIG_PATH";

/// System-wide configuration file
const SYSTEM_CONFIG_PATH: &str = "/opt/ares/etc/membership.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Top-level membership configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MembershipConfig {
    /// Port the data server listens on; published in the presence record.
    #[serde(default = "default_port")]
    pub port: u16,

    #[validate(nested)]
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[validate(nested)]
    #[serde(default)]
    pub coordination: CoordinationConfig,

    #[validate(nested)]
    #[serde(default)]
    pub schema_sync: SchemaSyncConfig,
}

/// Cluster identity of this node.
///
/// An empty `instance_name` is accepted here; `connect` rejects it so that the
/// failure is reported as an invalid identity at the point of joining.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ClusterConfig {
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub instance_name: String,
}

/// Coordination service client settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoordinationConfig {
    /// Comma-separated endpoint list.
    #[serde(default = "default_endpoints")]
    #[validate(length(min = 1))]
    pub endpoints: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_secs: u64,

    /// Session TTL in seconds; ephemeral nodes vanish this long after the
    /// process stops renewing the session.
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 5, max = 600))]
    pub session_ttl_secs: u64,
}

/// Periodic schema sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchemaSyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub interval_secs: u64,
}

fn default_port() -> u16 {
    9374
}

fn default_endpoints() -> String {
    "http://localhost:2379".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_session_ttl_secs() -> u64 {
    30
}

fn default_sync_interval_secs() -> u64 {
    10
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cluster: ClusterConfig::default(),
            coordination: CoordinationConfig::default(),
            schema_sync: SchemaSyncConfig::default(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            timeout_secs: default_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Default for SchemaSyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
        }
    }
}

impl CoordinationConfig {
    /// Endpoints split on commas, trimmed, empties dropped.
    pub fn endpoint_list(&self) -> Vec<String> {
        self.endpoints
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl SchemaSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MembershipConfig {
    /// Create a Figment configuration with all sources merged.
    pub fn figment() -> Figment {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(MembershipConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ARES_").only(&["port"]))
            // ARES_CLUSTER_CLUSTER_NAME, ARES_CLUSTER_INSTANCE_NAME
            .merge(
                Env::prefixed("ARES_CLUSTER_")
                    .map(|k| format!("cluster.{}", k.as_str().to_lowercase()).into()),
            )
            // ARES_COORDINATION_ENDPOINTS, ARES_COORDINATION_TIMEOUT_SECS, ...
            .merge(
                Env::prefixed("ARES_COORDINATION_")
                    .map(|k| format!("coordination.{}", k.as_str().to_lowercase()).into()),
            )
            // ARES_SCHEMA_SYNC_INTERVAL_SECS
            .merge(
                Env::prefixed("ARES_SCHEMA_SYNC_")
                    .map(|k| format!("schema_sync.{}", k.as_str().to_lowercase()).into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract and validate configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a figment from defaults, then merge a custom provider on top.
    pub fn figment_with<T: Provider>(extra: T) -> Figment {
        Self::figment().merge(extra)
    }

    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity::new(&self.cluster.cluster_name, &self.cluster.instance_name)
    }
}

impl Provider for MembershipConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("MembershipConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

/// Returns true if the env var is set to a truthy value (`1`, `true`, `on`, `yes`).
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(&val),
        Err(_) => false,
    }
}

pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}
