// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Completion marker for the local model cache.
//!
//! The marker is written only after every artifact has been copied, so its
//! presence is the sole signal that the cache is complete. Its body is
//! informational.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shardhost_runtime::error::TransferError;

use crate::storage::{ModelLocation, TransferReport};

/// What was copied, recorded in the marker body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub source: String,
    pub files: usize,
    pub bytes: u64,
    /// Seconds since the Unix epoch.
    pub completed_at: u64,
}

impl MarkerRecord {
    pub fn new(location: &ModelLocation, report: &TransferReport) -> Self {
        let completed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            source: location.to_string(),
            files: report.files,
            bytes: report.bytes,
            completed_at,
        }
    }
}

#[async_trait]
pub trait CompletionMarker: Send + Sync + std::fmt::Debug {
    async fn has_completed(&self) -> Result<bool, TransferError>;

    /// Must be the last write of a successful fetch.
    async fn mark_completed(&self, record: &MarkerRecord) -> Result<(), TransferError>;
}

/// Marker stored as a file inside the cache directory.
#[derive(Debug, Clone)]
pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record left by the fetch that completed the cache, if readable.
    pub async fn read_record(&self) -> Option<MarkerRecord> {
        let body = tokio::fs::read(&self.path).await.ok()?;
        serde_json::from_slice(&body).ok()
    }

    fn io_error(&self, source: std::io::Error) -> TransferError {
        TransferError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CompletionMarker for FileMarker {
    async fn has_completed(&self) -> Result<bool, TransferError> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn mark_completed(&self, record: &MarkerRecord) -> Result<(), TransferError> {
        let body = serde_json::to_vec_pretty(record).map_err(|e| self.io_error(e.into()))?;

        // Readers only ever see an absent or a complete marker.
        let staging = self
            .path
            .with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), "completion marker written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let marker = FileMarker::new(dir.path().join(".shardhost-complete"));
        assert!(!marker.has_completed().await.unwrap());
        assert!(marker.read_record().await.is_none());

        let location: ModelLocation = "s3://bucket/model".parse().unwrap();
        let record = MarkerRecord::new(&location, &TransferReport { files: 3, bytes: 42 });
        marker.mark_completed(&record).await.unwrap();

        assert!(marker.has_completed().await.unwrap());
        assert_eq!(marker.read_record().await.unwrap(), record);

        // No staging files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(".shardhost-complete")]);
    }

    #[tokio::test]
    async fn test_presence_alone_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done");
        std::fs::write(&path, "").unwrap();

        let marker = FileMarker::new(&path);
        assert!(marker.has_completed().await.unwrap());
        assert!(marker.read_record().await.is_none());
    }
}
