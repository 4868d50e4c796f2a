// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shardhost Logging Module.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `SHARDHOST_LOGGING_CONFIG_PATH` environment variable.
//!   3. `/opt/shardhost/etc/logging.toml`.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is `READABLE`. `JSONL`
//! can be enabled by setting the `SHARDHOST_LOGGING_JSONL` environment variable to `1`.
//!
//! Filters can be configured using the `SHARDHOST_LOG` environment variable or by setting the
//! `log_filters` key in the TOML configuration file. When `SHARDHOST_LOG` is set it replaces the
//! configured level; per-crate filters from the file still apply.
//!
//! Example:
//! ```toml
//! log_level = "error"
//!
//! [log_filters]
//! "shardhost_llm" = "info"
//! "shardhost_llm::coordinator" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::environment_names::logging as env_logging;
use crate::config::{disable_ansi_logging, jsonl_logging_enabled};

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// System-wide logging config file
const SYSTEM_CONFIG_PATH: &str = "/opt/shardhost/etc/logging.toml";

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
                ("hyper".to_string(), "error".to_string()),
                ("hyper_util".to_string(), "error".to_string()),
                ("reqwest".to_string(), "error".to_string()),
                ("rustls".to_string(), "error".to_string()),
                ("object_store".to_string(), "warn".to_string()),
                ("tokenizers".to_string(), "error".to_string()),
                ("axum".to_string(), "error".to_string()),
            ]),
        }
    }
}

/// Initialize the logger
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter = match load_config() {
        Ok(config) => build_filter(&config, std::env::var(env_logging::SHARDHOST_LOG).ok()),
        Err(err) => {
            eprintln!("Failed to load logging config, using defaults: {err}");
            build_filter(&LoggingConfig::default(), None)
        }
    };

    if jsonl_logging_enabled() {
        let layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_filter(filter);
        let _ = tracing_subscriber::registry().with(layer).try_init();
    } else {
        let layer = fmt::layer()
            .with_ansi(!disable_ansi_logging())
            .with_target(true)
            .with_filter(filter);
        let _ = tracing_subscriber::registry().with(layer).try_init();
    }
}

fn load_config() -> Result<LoggingConfig, Box<figment::Error>> {
    let config_path = std::env::var(env_logging::SHARDHOST_LOGGING_CONFIG_PATH).unwrap_or_default();
    Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(config_path))
        .extract()
        .map_err(Box::new)
}

fn build_filter(config: &LoggingConfig, env_directives: Option<String>) -> EnvFilter {
    let default_level = config
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    let mut filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .parse_lossy(env_directives.unwrap_or_default());

    for (module, level) in &config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log filter {module}={level}: {e}"),
        }
    }

    filter
}
