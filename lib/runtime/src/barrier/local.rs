// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Barrier, bounded};
use crate::error::BarrierError;
use crate::rank::GroupSize;

/// In-process barrier for workers running as tasks of one process.
///
/// Clones share the same barrier. Used directly for single-process groups and
/// as the test double that simulates N workers without spawning processes.
#[derive(Clone)]
pub struct LocalBarrier {
    inner: Arc<Inner>,
    timeout: Option<Duration>,
}

struct Inner {
    group_size: usize,
    barrier: tokio::sync::Barrier,
    arrived: AtomicUsize,
    released: AtomicUsize,
}

impl LocalBarrier {
    pub fn new(group_size: GroupSize) -> Self {
        Self {
            inner: Arc::new(Inner {
                group_size: group_size.as_usize(),
                barrier: tokio::sync::Barrier::new(group_size.as_usize()),
                arrived: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
            timeout: None,
        }
    }

    /// A timed-out wait leaves its slot counted; the barrier is not reusable after that.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Participants that have called `wait_for_all`.
    pub fn arrived(&self) -> usize {
        self.inner.arrived.load(Ordering::SeqCst)
    }

    /// Participants that have returned from `wait_for_all`.
    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBarrier")
            .field("group_size", &self.inner.group_size)
            .field("arrived", &self.arrived())
            .field("released", &self.released())
            .finish()
    }
}

#[async_trait]
impl Barrier for LocalBarrier {
    async fn wait_for_all(&self, group_size: GroupSize) -> Result<(), BarrierError> {
        if group_size.as_usize() != self.inner.group_size {
            return Err(BarrierError::GroupMismatch {
                expected: self.inner.group_size,
                requested: group_size.as_usize(),
            });
        }

        let arrived = self.inner.arrived.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(arrived, group_size = self.inner.group_size, "local barrier arrival");

        bounded(self.timeout, async {
            self.inner.barrier.wait().await;
            Ok(())
        })
        .await?;

        self.inner.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
