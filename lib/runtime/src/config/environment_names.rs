// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable names read by shardhost.
//!
//! Section-level overrides (`SHARDHOST_BARRIER_*`, `SHARDHOST_TRANSFER_*`,
//! `SHARDHOST_HTTP_*`) are mapped by [`super::WorkerConfig::figment`] and are
//! not listed individually.

/// Prefix shared by every top-level override.
pub const ENV_PREFIX: &str = "SHARDHOST_";

/// Optional TOML file merged over the system config.
pub const SHARDHOST_CONFIG_PATH: &str = "SHARDHOST_CONFIG_PATH";

/// Optional `serving.properties` file merged over the TOML files.
pub const SHARDHOST_PROPERTIES_PATH: &str = "SHARDHOST_PROPERTIES_PATH";

pub mod logging {
    /// Log filter directives, e.g. `info,shardhost_llm=debug`.
    pub const SHARDHOST_LOG: &str = "SHARDHOST_LOG";

    /// Optional TOML file with `log_level` and `[log_filters]`.
    pub const SHARDHOST_LOGGING_CONFIG_PATH: &str = "SHARDHOST_LOGGING_CONFIG_PATH";

    /// Emit one JSON object per line instead of readable output.
    pub const SHARDHOST_LOGGING_JSONL: &str = "SHARDHOST_LOGGING_JSONL";

    /// Disable ANSI colors in readable output.
    pub const SHARDHOST_SDK_DISABLE_ANSI_LOGGING: &str = "SHARDHOST_SDK_DISABLE_ANSI_LOGGING";
}

/// Read directly by the object store source; credentials are picked up by
/// `AmazonS3Builder::from_env` and are not listed here.
pub mod aws {
    /// Defaults to `us-east-1` when unset.
    pub const AWS_REGION: &str = "AWS_REGION";

    /// Custom S3-compatible endpoint; switches to path-style requests.
    pub const AWS_ENDPOINT: &str = "AWS_ENDPOINT";
}

/// Names that `Env::prefixed(ENV_PREFIX)` must not treat as config keys.
pub(crate) const RESERVED_SUFFIXES: &[&str] = &[
    "config_path",
    "properties_path",
    "log",
    "logging_config_path",
    "logging_jsonl",
    "sdk_disable_ansi_logging",
];

/// Section prefixes handled by dedicated providers.
pub(crate) const SECTION_PREFIXES: &[&str] = &["barrier_", "transfer_", "http_"];
