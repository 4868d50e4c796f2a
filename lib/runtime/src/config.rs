// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker configuration.
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults
//! 2. System config file at `/opt/shardhost/etc/worker.toml`
//! 3. TOML file from `SHARDHOST_CONFIG_PATH`
//! 4. `serving.properties` file from `SHARDHOST_PROPERTIES_PATH`
//! 5. Environment variables (`SHARDHOST_*`, `SHARDHOST_BARRIER_*`,
//!    `SHARDHOST_TRANSFER_*`, `SHARDHOST_HTTP_*`)

pub mod environment_names;
pub mod properties;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ConfigurationError;
use crate::rank::{DEFAULT_RANK_ENVS, GroupSize, RankGate};
use environment_names as env_names;
pub use properties::ServingProperties;

const SYSTEM_CONFIG_PATH: &str = "/opt/shardhost/etc/worker.toml";

/// Numeric precision the engine should construct the model in.
///
/// Every config source goes through [`FromStr`], so `BF16`, `bfloat16` and
/// `bf16` are the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Precision {
    Fp32,
    #[default]
    Fp16,
    Bf16,
    Int8,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
            Self::Bf16 => write!(f, "bf16"),
            Self::Int8 => write!(f, "int8"),
        }
    }
}

impl FromStr for Precision {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fp32" | "float32" => Ok(Self::Fp32),
            "fp16" | "float16" | "half" => Ok(Self::Fp16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "int8" => Ok(Self::Int8),
            other => Err(ConfigurationError::Unsupported(format!(
                "precision '{other}'; valid options are fp32, fp16, bf16, int8"
            ))),
        }
    }
}

impl TryFrom<String> for Precision {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Precision> for String {
    fn from(precision: Precision) -> Self {
        precision.to_string()
    }
}

/// How workers rendezvous after the model has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BarrierBackend {
    /// In-process barrier; only meaningful for a group of one process.
    #[default]
    Local,
    /// Arrival files on a directory shared by the group.
    File,
    /// Rank 0 accepts TCP connections from every follower.
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BarrierConfig {
    #[serde(default)]
    pub backend: BarrierBackend,

    /// Leader address for the TCP barrier.
    #[serde(default = "default_barrier_addr")]
    #[validate(length(min = 1))]
    pub addr: String,

    /// Directory for the file barrier. Defaults to `<cache_dir>/.barrier`.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Distinguishes rendezvous rounds sharing one directory.
    ///
    /// Arrival files outlive the process, so a restarted group reusing an id
    /// passes the file barrier at once. That only holds up because rank 0
    /// publishes its arrival after the completion marker: a stale rank 0
    /// arrival implies a complete cache. Set a per-launch id (e.g. the job id)
    /// when the cache directory can be wiped between launches.
    #[serde(default = "default_barrier_id")]
    #[validate(length(min = 1))]
    pub barrier_id: String,

    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// None = wait forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_barrier_addr() -> String {
    "127.0.0.1:29511".to_string()
}

fn default_barrier_id() -> String {
    "startup".to_string()
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            backend: BarrierBackend::default(),
            addr: default_barrier_addr(),
            dir: None,
            barrier_id: default_barrier_id(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
        }
    }
}

impl BarrierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn dir_for(&self, cache_dir: &Path) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| cache_dir.join(".barrier"))
    }
}

/// Which collaborator performs the bulk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransferBackend {
    /// Pick from the location scheme.
    #[default]
    Auto,
    ObjectStore,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferConfig {
    #[serde(default)]
    pub backend: TransferBackend,

    /// Program and arguments for the command backend. `{src}` and `{dst}` are
    /// replaced with the source URI and the destination directory.
    #[serde(default = "default_command")]
    #[validate(length(min = 1))]
    pub command: Vec<String>,

    /// Attempts per object for the object store backend.
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_command() -> Vec<String> {
    ["s5cmd", "sync", "{src}/*", "{dst}/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            backend: TransferBackend::default(),
            command: default_command(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Number of workers sharing one model instance (tensor parallel degree).
    #[validate(range(min = 1))]
    pub group_size: u32,

    /// Local directory shared by every worker on the host.
    pub cache_dir: PathBuf,

    /// Remote model address, e.g. `s3://bucket/prefix` or `file:///models/x`.
    #[validate(length(min = 1))]
    pub model_source: String,

    pub precision: Precision,

    /// Name of the engine used to construct the model.
    #[validate(length(min = 1))]
    pub engine: String,

    /// File name of the completion marker inside `cache_dir`.
    #[validate(length(min = 1))]
    pub marker_name: String,

    /// Environment variables consulted for the worker rank, in order.
    #[validate(length(min = 1))]
    pub rank_env: Vec<String>,

    /// Watchdog over the whole startup sequence. None = no limit.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,

    #[validate(nested)]
    #[serde(default)]
    pub barrier: BarrierConfig,

    #[validate(nested)]
    #[serde(default)]
    pub transfer: TransferConfig,

    #[validate(nested)]
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            group_size: 1,
            cache_dir: PathBuf::from("/tmp/shardhost/model"),
            model_source: String::new(),
            precision: Precision::default(),
            engine: "echo".to_string(),
            marker_name: ".shardhost-complete".to_string(),
            rank_env: DEFAULT_RANK_ENVS.iter().map(|s| s.to_string()).collect(),
            startup_timeout_secs: None,
            barrier: BarrierConfig::default(),
            transfer: TransferConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a Figment configuration with all sources merged, taking the
    /// optional file paths from the environment.
    pub fn figment() -> Result<Figment, ConfigurationError> {
        Self::figment_with(
            std::env::var_os(env_names::SHARDHOST_CONFIG_PATH).map(PathBuf::from),
            std::env::var_os(env_names::SHARDHOST_PROPERTIES_PATH).map(PathBuf::from),
        )
    }

    /// Like [`WorkerConfig::figment`] with explicit TOML and properties files.
    pub fn figment_with(
        config_path: Option<PathBuf>,
        properties_path: Option<PathBuf>,
    ) -> Result<Figment, ConfigurationError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(WorkerConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = properties_path {
            figment = figment.merge(ServingProperties::file(path)?);
        }

        Ok(figment
            // SHARDHOST_GROUP_SIZE, SHARDHOST_MODEL_SOURCE, ...
            .merge(
                Env::prefixed(env_names::ENV_PREFIX).filter(|key| {
                    let key = key.as_str().to_lowercase();
                    !env_names::RESERVED_SUFFIXES.contains(&key.as_str())
                        && !env_names::SECTION_PREFIXES
                            .iter()
                            .any(|prefix| key.starts_with(prefix))
                }),
            )
            // SHARDHOST_BARRIER_BACKEND, SHARDHOST_BARRIER_ADDR, ...
            .merge(
                Env::prefixed("SHARDHOST_BARRIER_")
                    .map(|k| format!("barrier.{}", k.as_str().to_lowercase()).into()),
            )
            // SHARDHOST_TRANSFER_BACKEND, SHARDHOST_TRANSFER_MAX_RETRIES, ...
            .merge(
                Env::prefixed("SHARDHOST_TRANSFER_")
                    .map(|k| format!("transfer.{}", k.as_str().to_lowercase()).into()),
            )
            // SHARDHOST_HTTP_HOST, SHARDHOST_HTTP_PORT
            .merge(
                Env::prefixed("SHARDHOST_HTTP_")
                    .map(|k| format!("http.{}", k.as_str().to_lowercase()).into()),
            ))
    }

    /// Load configuration from files and the environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::extract_from(Self::figment()?)
    }

    /// Extract and validate configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigurationError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigurationError::Extraction(Box::new(e)))?;
        config.validate()?;
        config.check_consistency()?;
        Ok(config)
    }

    fn check_consistency(&self) -> Result<(), ConfigurationError> {
        if self.barrier.backend == BarrierBackend::Local && self.group_size > 1 {
            return Err(ConfigurationError::Unsupported(format!(
                "the local barrier cannot span {} processes; use the file or tcp backend",
                self.group_size
            )));
        }
        Ok(())
    }

    pub fn group_size(&self) -> Result<GroupSize, ConfigurationError> {
        GroupSize::new(self.group_size)
    }

    pub fn rank_gate(&self) -> RankGate {
        RankGate::new(self.rank_env.clone())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.cache_dir.join(&self.marker_name)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_secs.map(Duration::from_secs)
    }
}

fn env_is_truthy(env: &str) -> bool {
    std::env::var(env)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

/// Whether log output should be JSON lines.
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(env_names::logging::SHARDHOST_LOGGING_JSONL)
}

/// Whether ANSI colors should be stripped from readable log output.
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(env_names::logging::SHARDHOST_SDK_DISABLE_ANSI_LOGGING)
}
