// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for processes embedding the membership manager.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `ARES_LOGGING_CONFIG_PATH` environment variable.
//!   3. `/opt/ares/etc/logging.toml`.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `ARES_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `ARES_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file. The default log level is `info`.
//!
//! Example:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "ares_membership::schema" = "debug"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::env_is_truthy;

/// ENV used to set the log level
const FILTER_ENV: &str = "ARES_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// ENV used to set the path to the logging configuration file
const CONFIG_PATH_ENV: &str = "ARES_LOGGING_CONFIG_PATH";

/// ENV switching output to one JSON object per line
const JSONL_ENV: &str = "ARES_LOGGING_JSONL";

/// ENV disabling ANSI colours in readable output
const DISABLE_ANSI_ENV: &str = "ARES_LOGGING_DISABLE_ANSI";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::from([
                ("h2".to_string(), "error".to_string()),
                ("tower".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("tonic".to_string(), "error".to_string()),
            ]),
        }
    }
}

/// Initialize the global subscriber. Later calls are no-ops.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter_layer = filters(load_config());

    let result = if env_is_truthy(JSONL_ENV) {
        let l = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    } else {
        let l = fmt::layer()
            .with_ansi(!env_is_truthy(DISABLE_ANSI_ENV))
            .event_format(fmt::format().compact())
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    };

    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {e}");
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config.log_level.parse::<Directive>().unwrap_or_else(|e| {
        eprintln!(
            "Invalid log level '{}': {e}; using {DEFAULT_FILTER_LEVEL}",
            config.log_level
        );
        LevelFilter::INFO.into()
    });

    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    // apply the log_filters from the config files
    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();
    let figment = Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file("/opt/ares/etc/logging.toml"))
        .merge(Toml::file(config_path));

    figment.extract().unwrap_or_else(|e| {
        eprintln!("Failed to load logging config: {e}; using defaults");
        LoggingConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let config = load_config();
            assert_eq!(config.log_level, "info");
            assert_eq!(config.log_filters.get("tonic").map(String::as_str), Some("error"));
        });
    }

    #[test]
    fn test_filters_tolerate_bad_entries() {
        temp_env::with_var_unset(FILTER_ENV, || {
            let config = LoggingConfig {
                log_level: "not-a-level!!".to_string(),
                log_filters: HashMap::from([
                    ("ares_membership".to_string(), "debug".to_string()),
                    ("broken".to_string(), "=?".to_string()),
                ]),
            };
            let filter = filters(config);
            let rendered = filter.to_string();
            assert!(rendered.contains("ares_membership=debug"));
        });
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialized");
    }
}
