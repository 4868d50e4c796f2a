// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use shardhost_runtime::error::TransferError;

use super::{ModelLocation, ModelSource, TransferReport, io_error};

/// Recursive copy from a directory on a local or mounted filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

#[async_trait]
impl ModelSource for LocalSource {
    async fn copy_to(
        &self,
        location: &ModelLocation,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        let ModelLocation::Local { path: root } = location else {
            return Err(TransferError::Unsupported {
                location: location.to_string(),
                reason: "local source only reads file:// locations".to_string(),
            });
        };

        let meta = tokio::fs::metadata(root).await.map_err(io_error(root))?;
        if !meta.is_dir() {
            return Err(TransferError::Unsupported {
                location: location.to_string(),
                reason: "path is not a directory".to_string(),
            });
        }

        tracing::info!(src = %root.display(), dest = %dest.display(), "copying model from local path");

        let mut report = TransferReport::default();
        let mut pending: Vec<PathBuf> = vec![PathBuf::new()];
        while let Some(rel_dir) = pending.pop() {
            let src_dir = root.join(&rel_dir);
            tokio::fs::create_dir_all(dest.join(&rel_dir))
                .await
                .map_err(io_error(dest))?;

            let mut entries = tokio::fs::read_dir(&src_dir)
                .await
                .map_err(io_error(&src_dir))?;
            while let Some(entry) = entries.next_entry().await.map_err(io_error(&src_dir))? {
                let rel = rel_dir.join(entry.file_name());
                let file_type = entry.file_type().await.map_err(io_error(&entry.path()))?;
                if file_type.is_dir() {
                    pending.push(rel);
                    continue;
                }

                let target = dest.join(&rel);
                let bytes = tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(io_error(&target))?;
                report.record(bytes);
                tracing::trace!(file = %rel.display(), bytes, "copied");
            }
        }

        Ok(report)
    }
}
