// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fetch-once guard run by the rank 0 worker.
//!
//! Exactly one worker per group may run this; concurrent guards on the same
//! cache directory are not detected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use shardhost_runtime::error::TransferError;

use crate::marker::{CompletionMarker, MarkerRecord};
use crate::storage::{ModelLocation, ModelSource, TransferReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The marker was already present; nothing was copied.
    Skipped,
    Fetched(TransferReport),
}

#[derive(Debug, Clone)]
pub struct FetchOnceGuard {
    location: ModelLocation,
    cache_dir: PathBuf,
    source: Arc<dyn ModelSource>,
    marker: Arc<dyn CompletionMarker>,
}

impl FetchOnceGuard {
    pub fn new(
        location: ModelLocation,
        cache_dir: impl Into<PathBuf>,
        source: Arc<dyn ModelSource>,
        marker: Arc<dyn CompletionMarker>,
    ) -> Self {
        Self {
            location,
            cache_dir: cache_dir.into(),
            source,
            marker,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Populate the cache unless a previous run already completed it.
    ///
    /// On error the marker is left untouched, so the next run starts over.
    pub async fn ensure_fetched(&self) -> Result<FetchOutcome, TransferError> {
        if self.marker.has_completed().await? {
            tracing::info!(cache_dir = %self.cache_dir.display(), "model cache complete, skipping download");
            return Ok(FetchOutcome::Skipped);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|source| TransferError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;

        let report = self.source.copy_to(&self.location, &self.cache_dir).await?;
        if report.files == 0 {
            return Err(TransferError::EmptySource {
                location: self.location.to_string(),
            });
        }

        self.marker
            .mark_completed(&MarkerRecord::new(&self.location, &report))
            .await?;

        tracing::info!(
            source = %self.location,
            files = report.files,
            bytes = report.bytes,
            "model cache populated"
        );
        Ok(FetchOutcome::Fetched(report))
    }
}
