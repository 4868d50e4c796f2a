// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Group rendezvous.
//!
//! Every worker calls [`Barrier::wait_for_all`] exactly once during startup,
//! after the leader has (possibly) fetched the model and before anyone reads
//! the cache. No participant returns before all `group_size` participants have
//! arrived. Because the leader writes the completion marker before arriving,
//! that write happens-before every worker's release.
//!
//! There is no timeout unless one is configured; a leader that never arrives
//! hangs the group.

mod file;
mod local;
mod tcp;

pub use file::FileBarrier;
pub use local::LocalBarrier;
pub use tcp::TcpBarrier;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BarrierBackend, BarrierConfig};
use crate::error::BarrierError;
use crate::rank::{GroupSize, WorkerRank};

/// Blocking collective over a fixed worker group.
#[async_trait]
pub trait Barrier: Send + Sync + std::fmt::Debug {
    /// Block until `group_size` participants, including this one, have called
    /// this method.
    async fn wait_for_all(&self, group_size: GroupSize) -> Result<(), BarrierError>;
}

/// Build the barrier selected by `config` for this worker.
pub fn from_config(
    config: &BarrierConfig,
    cache_dir: &Path,
    rank: WorkerRank,
    group_size: GroupSize,
) -> Arc<dyn Barrier> {
    match config.backend {
        BarrierBackend::Local => Arc::new(LocalBarrier::new(group_size).with_timeout(config.timeout())),
        BarrierBackend::File => Arc::new(
            FileBarrier::new(config.dir_for(cache_dir), config.barrier_id.clone(), rank)
                .with_poll_interval(config.poll_interval())
                .with_timeout(config.timeout()),
        ),
        BarrierBackend::Tcp => Arc::new(
            TcpBarrier::new(config.addr.clone(), rank)
                .with_retry_interval(config.poll_interval())
                .with_timeout(config.timeout()),
        ),
    }
}

/// Apply an optional watchdog to a barrier wait.
async fn bounded<F>(timeout: Option<Duration>, wait: F) -> Result<(), BarrierError>
where
    F: Future<Output = Result<(), BarrierError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| BarrierError::Timeout { waited: limit })?,
        None => wait.await,
    }
}
