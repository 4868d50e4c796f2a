// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{Barrier, bounded};
use crate::error::BarrierError;
use crate::rank::{GroupSize, WorkerRank};

const ARRIVAL_PREFIX: &str = "rank-";

/// Rendezvous through arrival files on a directory visible to the whole group.
///
/// Each worker publishes `<dir>/<barrier_id>/rank-<r>` and polls until every
/// rank in `0..group_size` has published. Arrival files are never removed, so
/// `barrier_id` must be unique per launch of the group; a restarted group
/// reusing an id passes through immediately.
#[derive(Debug, Clone)]
pub struct FileBarrier {
    dir: PathBuf,
    barrier_id: String,
    rank: WorkerRank,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl FileBarrier {
    pub fn new(dir: impl Into<PathBuf>, barrier_id: impl Into<String>, rank: WorkerRank) -> Self {
        Self {
            dir: dir.into(),
            barrier_id: barrier_id.into(),
            rank,
            poll_interval: Duration::from_millis(200),
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn round_dir(&self) -> PathBuf {
        self.dir.join(&self.barrier_id)
    }

    async fn publish_arrival(&self) -> Result<(), BarrierError> {
        let round_dir = self.round_dir();
        tokio::fs::create_dir_all(&round_dir).await?;

        // Write then rename so a poller never sees a half-written file.
        let name = format!("{ARRIVAL_PREFIX}{}", self.rank);
        let staging = round_dir.join(format!(".{name}.{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, self.rank.to_string()).await?;
        tokio::fs::rename(&staging, round_dir.join(name)).await?;
        Ok(())
    }

    async fn count_arrivals(&self, group_size: GroupSize) -> Result<usize, BarrierError> {
        let mut entries = tokio::fs::read_dir(self.round_dir()).await?;
        let mut arrived = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(rank) = name
                .to_str()
                .and_then(|n| n.strip_prefix(ARRIVAL_PREFIX))
                .and_then(|r| r.parse::<u32>().ok())
            else {
                continue;
            };
            if rank < group_size.get() {
                arrived += 1;
            }
        }
        Ok(arrived)
    }
}

#[async_trait]
impl Barrier for FileBarrier {
    async fn wait_for_all(&self, group_size: GroupSize) -> Result<(), BarrierError> {
        self.rank
            .check_in(group_size)
            .map_err(|e| BarrierError::Protocol(e.to_string()))?;

        bounded(self.timeout, async {
            self.publish_arrival().await?;
            tracing::debug!(
                rank = %self.rank,
                dir = %self.round_dir().display(),
                "published barrier arrival"
            );

            loop {
                let arrived = self.count_arrivals(group_size).await?;
                if arrived >= group_size.as_usize() {
                    return Ok(());
                }
                tracing::trace!(arrived, expected = group_size.get(), "waiting at file barrier");
                tokio::time::sleep(self.poll_interval).await;
            }
        })
        .await
    }
}
