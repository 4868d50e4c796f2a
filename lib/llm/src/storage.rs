// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Remote model storage.
//!
//! A [`ModelSource`] copies every object under a [`ModelLocation`] into a local
//! directory. Which implementation is used is decided once at startup by
//! [`source_for`].

mod command;
mod local;
mod location;
mod s3;

pub use command::CommandSource;
pub use local::LocalSource;
pub use location::ModelLocation;
pub use s3::{ObjectStoreSource, RetryPolicy};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shardhost_runtime::config::{TransferBackend, TransferConfig};
use shardhost_runtime::error::{ConfigurationError, TransferError};

/// Files and bytes written into the cache by one copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub files: usize,
    pub bytes: u64,
}

impl TransferReport {
    fn record(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// Bulk copy collaborator.
#[async_trait]
pub trait ModelSource: Send + Sync + std::fmt::Debug {
    /// Recursively copy everything under `location` into `dest`.
    ///
    /// `dest` exists when this is called. Implementations overwrite files
    /// already present; they never write the completion marker.
    async fn copy_to(
        &self,
        location: &ModelLocation,
        dest: &Path,
    ) -> Result<TransferReport, TransferError>;
}

/// Pick the copy implementation for `location`.
pub fn source_for(
    location: &ModelLocation,
    config: &TransferConfig,
) -> Result<Arc<dyn ModelSource>, ConfigurationError> {
    let source: Arc<dyn ModelSource> = match (config.backend, location) {
        (TransferBackend::Command, _) => Arc::new(CommandSource::new(config.command.clone())?),
        (TransferBackend::Auto | TransferBackend::ObjectStore, ModelLocation::S3 { .. }) => {
            Arc::new(ObjectStoreSource::new(RetryPolicy::from(config)))
        }
        (TransferBackend::Auto, ModelLocation::Local { .. }) => Arc::new(LocalSource),
        (TransferBackend::ObjectStore, ModelLocation::Local { .. }) => {
            return Err(ConfigurationError::Unsupported(format!(
                "the object_store transfer backend cannot read {location}"
            )));
        }
    };
    tracing::debug!(?source, %location, "selected model source");
    Ok(source)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransferError + '_ {
    move |source| TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Count the regular files below `dir`.
///
/// Dot entries directly under `dir` belong to the worker itself (completion
/// marker, barrier directory) and are not counted.
pub(crate) async fn tally_dir(dir: &Path) -> Result<TransferReport, TransferError> {
    let mut report = TransferReport::default();
    let mut pending: Vec<(PathBuf, bool)> = vec![(dir.to_path_buf(), true)];

    while let Some((current, top)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(io_error(&current))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&current))? {
            if top && entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let meta = entry.metadata().await.map_err(io_error(&path))?;
            if meta.is_dir() {
                pending.push((path, false));
            } else if meta.is_file() {
                report.record(meta.len());
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tally_skips_top_level_dot_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("shards/.cache")).unwrap();
        std::fs::write(dir.path().join("shards/.cache/a.bin"), "abc").unwrap();
        std::fs::write(dir.path().join(".shardhost-complete"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join(".barrier/startup")).unwrap();
        std::fs::write(dir.path().join(".barrier/startup/rank-1"), "1").unwrap();

        let report = tally_dir(dir.path()).await.unwrap();
        assert_eq!(report, TransferReport { files: 2, bytes: 5 });
    }

    #[test]
    fn test_source_selection() {
        let s3: ModelLocation = "s3://bucket/model".parse().unwrap();
        let local: ModelLocation = "/models/tiny".parse().unwrap();
        let mut config = TransferConfig::default();

        assert!(format!("{:?}", source_for(&s3, &config).unwrap()).contains("ObjectStoreSource"));
        assert!(format!("{:?}", source_for(&local, &config).unwrap()).contains("LocalSource"));

        config.backend = TransferBackend::Command;
        assert!(format!("{:?}", source_for(&s3, &config).unwrap()).contains("CommandSource"));

        config.backend = TransferBackend::ObjectStore;
        assert!(source_for(&local, &config).is_err());
    }
}
