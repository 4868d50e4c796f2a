// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use object_store::{ClientOptions, ObjectStore, aws::AmazonS3Builder, path::Path as ObjectPath};
use tokio::io::AsyncWriteExt;

use shardhost_runtime::config::TransferConfig;
use shardhost_runtime::config::environment_names::aws as env_aws;
use shardhost_runtime::error::TransferError;

use super::{ModelLocation, ModelSource, TransferReport, io_error};

/// Upper bound on a single request, long enough for multi-GB shards.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Exponential backoff applied to each object independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }
}

/// Copies from S3 (or any S3-compatible endpoint) with `object_store`.
///
/// Credentials and region come from the standard `AWS_*` environment
/// variables. Setting `AWS_ENDPOINT` switches to path-style requests for
/// S3-compatible stores; `AWS_ALLOW_HTTP=true` permits plain HTTP.
#[derive(Clone)]
pub struct ObjectStoreSource {
    retry: RetryPolicy,
    store: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for ObjectStoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSource")
            .field("retry", &self.retry)
            .field("store", &self.store.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl ObjectStoreSource {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry, store: None }
    }

    /// Read every bucket through `store` instead of building an S3 client.
    pub fn with_store(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self {
            retry,
            store: Some(store),
        }
    }

    fn store_for(&self, bucket: &str) -> anyhow::Result<Arc<dyn ObjectStore>> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }

        let client_opts = ClientOptions::new().with_timeout(CLIENT_TIMEOUT);
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_client_options(client_opts);

        if std::env::var(env_aws::AWS_REGION).is_err() {
            builder = builder.with_region("us-east-1");
        }
        if std::env::var(env_aws::AWS_ENDPOINT).is_ok() {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .with_context(|| format!("failed to configure S3 client for bucket {bucket}"))?;
        Ok(Arc::new(store))
    }

    async fn stream_to_file(
        store: &Arc<dyn ObjectStore>,
        location: &ObjectPath,
        dest: &Path,
    ) -> anyhow::Result<u64> {
        let get_result = store
            .get(location)
            .await
            .with_context(|| format!("failed to GET {location}"))?;

        let mut stream = get_result.into_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("error reading stream for {location}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("failed to write chunk to {}", dest.display()))?;
            total_bytes += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(total_bytes)
    }

    async fn download_with_retry(
        &self,
        store: &Arc<dyn ObjectStore>,
        location: &ObjectPath,
        dest: &Path,
    ) -> anyhow::Result<u64> {
        let mut attempt = 1;
        loop {
            match Self::stream_to_file(store, location, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) if attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        %location,
                        attempt,
                        max_retries = self.retry.max_retries,
                        ?backoff,
                        "object download failed, retrying: {error:#}"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn copy_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        let remote = |source: anyhow::Error| TransferError::Remote {
            location: format!("s3://{bucket}/{prefix}"),
            source,
        };

        let store = self.store_for(bucket).map_err(remote)?;
        let object_prefix = ObjectPath::from(prefix);
        let mut list_stream = if prefix.is_empty() {
            store.list(None)
        } else {
            store.list(Some(&object_prefix))
        };

        let mut report = TransferReport::default();
        while let Some(meta) = list_stream.next().await {
            let meta = meta.map_err(|e| remote(e.into()))?;

            let rel_path = meta
                .location
                .as_ref()
                .strip_prefix(prefix)
                .unwrap_or(meta.location.as_ref())
                .trim_start_matches('/');
            if rel_path.is_empty() {
                continue;
            }

            let file_path = dest.join(rel_path);
            if let Some(parent) = file_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(io_error(parent))?;
            }

            let bytes = self
                .download_with_retry(&store, &meta.location, &file_path)
                .await
                .map_err(remote)?;
            report.record(bytes);
            tracing::debug!(object = rel_path, bytes, "downloaded");
        }

        Ok(report)
    }
}

#[async_trait]
impl ModelSource for ObjectStoreSource {
    async fn copy_to(
        &self,
        location: &ModelLocation,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        let ModelLocation::S3 { bucket, prefix } = location else {
            return Err(TransferError::Unsupported {
                location: location.to_string(),
                reason: "object store source only reads s3:// locations".to_string(),
            });
        };

        tracing::info!(bucket, prefix, dest = %dest.display(), "downloading model from S3");
        let report = self.copy_prefix(bucket, prefix, dest).await?;
        tracing::info!(files = report.files, bytes = report.bytes, "S3 download finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::{PutPayload, memory::InMemory};
    use tempfile::TempDir;

    async fn put(store: &InMemory, key: &str, body: &str) {
        store
            .put(&ObjectPath::from(key), PutPayload::from(body.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff(40), Duration::from_millis(30000));
    }

    #[tokio::test]
    async fn test_copies_every_object_under_prefix() {
        let store = InMemory::new();
        put(&store, "models/tiny/config.json", "{}").await;
        put(&store, "models/tiny/tokenizer.json", "tok").await;
        put(&store, "models/tiny/shards/model-00001.safetensors", "weights").await;
        put(&store, "models/other/config.json", "nope").await;

        let dest = TempDir::new().unwrap();
        let source = ObjectStoreSource::with_store(Arc::new(store), fast_retry());
        let location: ModelLocation = "s3://bucket/models/tiny".parse().unwrap();

        let report = source.copy_to(&location, dest.path()).await.unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(report.bytes, 2 + 3 + 7);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("shards/model-00001.safetensors")).unwrap(),
            "weights"
        );
        assert!(!dest.path().join("other").exists());
    }

    #[tokio::test]
    async fn test_empty_prefix_copies_nothing() {
        let dest = TempDir::new().unwrap();
        let source = ObjectStoreSource::with_store(Arc::new(InMemory::new()), fast_retry());
        let location: ModelLocation = "s3://bucket/missing".parse().unwrap();

        let report = source.copy_to(&location, dest.path()).await.unwrap();
        assert_eq!(report, TransferReport::default());
    }

    #[tokio::test]
    async fn test_rejects_local_location() {
        let dest = TempDir::new().unwrap();
        let source = ObjectStoreSource::with_store(Arc::new(InMemory::new()), fast_retry());
        let location: ModelLocation = "/models/tiny".parse().unwrap();

        let err = source.copy_to(&location, dest.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::Unsupported { .. }));
    }
}
