// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shardhost Error System
//!
//! Startup failures are split by the phase that produced them:
//! - [`ConfigurationError`]: rank, group size or config file problems
//! - [`TransferError`]: the remote copy into the local cache failed
//! - [`BarrierError`]: the group rendezvous failed
//! - [`ConstructionError`]: artifacts or the engine could not be loaded
//!
//! None of these are recovered locally. [`StartupError`] wraps all of them so
//! the worker binary can log the category and exit; restarts are the job of
//! the process supervisor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categorizes startup errors into a fixed set of types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    Configuration,
    Transfer,
    Barrier,
    Construction,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorType::Configuration => write!(f, "ConfigurationError"),
            ErrorType::Transfer => write!(f, "TransferError"),
            ErrorType::Barrier => write!(f, "BarrierError"),
            ErrorType::Construction => write!(f, "ConstructionError"),
        }
    }
}

/// Missing or unsupported deployment configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("worker rank is not set; none of {names:?} are present")]
    RankUnset { names: Vec<String> },

    #[error("worker rank {name}={value:?} is not a non-negative integer")]
    RankInvalid { name: String, value: String },

    #[error("worker rank {rank} is out of range for a group of {group_size}")]
    RankOutOfRange { rank: u32, group_size: u32 },

    #[error("worker group size must be at least 1")]
    EmptyGroup,

    #[error("invalid model location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// The remote copy into the local cache directory failed.
///
/// When this is returned the completion marker has not been written.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote copy from {location} failed: {source}")]
    Remote {
        location: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("no objects found under {location}")]
    EmptySource { location: String },

    #[error("cannot copy from {location}: {reason}")]
    Unsupported { location: String, reason: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// The group rendezvous failed.
#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("barrier i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("barrier protocol violation: {0}")]
    Protocol(String),

    #[error("barrier built for {expected} participants was asked to wait for {requested}")]
    GroupMismatch { expected: usize, requested: usize },

    #[error("barrier timed out after {waited:?}")]
    Timeout { waited: Duration },
}

/// The model could not be constructed from the local cache.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("model directory {dir} has no {kind}")]
    MissingArtifact { dir: PathBuf, kind: &'static str },

    #[error("failed to load tokenizer from {path}: {source}")]
    Tokenizer {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine `{engine}` failed to initialize: {source}")]
    Engine {
        engine: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Any fatal error raised while bringing a worker to READY.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

impl StartupError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            StartupError::Configuration(_) => ErrorType::Configuration,
            StartupError::Transfer(_) => ErrorType::Transfer,
            StartupError::Barrier(_) => ErrorType::Barrier,
            StartupError::Construction(_) => ErrorType::Construction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_type() {
        let err: StartupError = ConfigurationError::EmptyGroup.into();
        assert_eq!(err.error_type(), ErrorType::Configuration);
        assert_eq!(err.error_type().to_string(), "ConfigurationError");

        let err: StartupError = TransferError::EmptySource {
            location: "s3://bucket/model".into(),
        }
        .into();
        assert_eq!(err.error_type(), ErrorType::Transfer);
        assert_eq!(err.to_string(), "no objects found under s3://bucket/model");
    }

    #[test]
    fn test_command_failed_display() {
        let err = TransferError::CommandFailed {
            program: "s5cmd".into(),
            code: Some(1),
            stderr: "access denied".into(),
        };
        assert_eq!(err.to_string(), "`s5cmd` exited with status 1: access denied");

        let err = TransferError::CommandFailed {
            program: "s5cmd".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("a signal"));
    }
}
