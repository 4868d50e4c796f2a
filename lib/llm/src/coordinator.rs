// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Distributed model materialization.
//!
//! Every worker in a group runs the same sequence once at startup:
//!
//! ```text
//! rank gate -> [rank 0] fetch once -> barrier (all) -> construct (all) -> READY
//! ```
//!
//! Rank 0 writes the completion marker before it arrives at the barrier and
//! nobody leaves the barrier until rank 0 has arrived, so no worker reads the
//! cache before it is complete. Followers may reach the barrier long before
//! rank 0 starts downloading; they just wait there.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use derive_builder::Builder;
use serde::Serialize;
use tokio::sync::watch;

use shardhost_runtime::barrier::Barrier;
use shardhost_runtime::config::Precision;
use shardhost_runtime::error::StartupError;
use shardhost_runtime::rank::{GroupSize, RankGate, WorkerRank};

use crate::engine::{EngineBuilder, ModelHandle, ModelSpec};
use crate::fetch::{FetchOnceGuard, FetchOutcome};
use crate::marker::CompletionMarker;
use crate::storage::{ModelLocation, ModelSource};

/// Startup progress of one worker. `Ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerPhase {
    Uninitialized,
    Fetching,
    Skipping,
    BarrierWait,
    Constructing,
    Ready,
}

impl WorkerPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, WorkerPhase::Ready)
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerPhase::Uninitialized => "UNINITIALIZED",
            WorkerPhase::Fetching => "FETCHING",
            WorkerPhase::Skipping => "SKIPPING",
            WorkerPhase::BarrierWait => "BARRIER_WAIT",
            WorkerPhase::Constructing => "CONSTRUCTING",
            WorkerPhase::Ready => "READY",
        };
        f.write_str(name)
    }
}

/// Builds the barrier once the rank is known.
pub type BarrierFactory = Arc<dyn Fn(WorkerRank) -> Arc<dyn Barrier> + Send + Sync>;

#[derive(Clone, Builder)]
#[builder(pattern = "owned")]
pub struct CoordinatorConfig {
    #[builder(default)]
    rank_gate: RankGate,

    group_size: GroupSize,

    location: ModelLocation,

    #[builder(setter(into))]
    cache_dir: PathBuf,

    #[builder(default)]
    precision: Precision,

    source: Arc<dyn ModelSource>,

    marker: Arc<dyn CompletionMarker>,

    barrier: BarrierFactory,

    engine: EngineBuilder,
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }
}

/// A worker that reached READY.
#[derive(Debug, Clone)]
pub struct ReadyWorker {
    pub rank: WorkerRank,
    /// `None` on followers, which never fetch.
    pub fetch: Option<FetchOutcome>,
    pub handle: ModelHandle,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    phase: watch::Sender<WorkerPhase>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (phase, _) = watch::channel(WorkerPhase::Uninitialized);
        Self { config, phase }
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: WorkerPhase, rank: WorkerRank) {
        tracing::info!(
            %rank,
            group_size = %self.config.group_size,
            %phase,
            "worker phase"
        );
        self.phase.send_replace(phase);
    }

    /// Run the startup sequence with the rank taken from the environment.
    pub async fn run(&self) -> Result<ReadyWorker, StartupError> {
        self.run_with(|name| std::env::var(name).ok()).await
    }

    /// Run the startup sequence, resolving rank variables through `lookup`.
    pub async fn run_with<F>(&self, lookup: F) -> Result<ReadyWorker, StartupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = &self.config;
        let rank = config.rank_gate.resolve_with(lookup, config.group_size)?;

        let fetch = if rank.is_leader() {
            Some(self.fetch_once(rank).await?)
        } else {
            None
        };

        self.enter(WorkerPhase::BarrierWait, rank);
        let barrier = (config.barrier)(rank);
        barrier.wait_for_all(config.group_size).await?;

        self.enter(WorkerPhase::Constructing, rank);
        let spec = ModelSpec {
            model_dir: config.cache_dir.clone(),
            rank,
            group_size: config.group_size,
            precision: config.precision,
        };
        let handle = config.engine.build(spec).await?;

        self.enter(WorkerPhase::Ready, rank);
        Ok(ReadyWorker {
            rank,
            fetch,
            handle,
        })
    }

    async fn fetch_once(&self, rank: WorkerRank) -> Result<FetchOutcome, StartupError> {
        let config = &self.config;
        let phase = if config.marker.has_completed().await? {
            WorkerPhase::Skipping
        } else {
            WorkerPhase::Fetching
        };
        self.enter(phase, rank);

        let guard = FetchOnceGuard::new(
            config.location.clone(),
            config.cache_dir.clone(),
            config.source.clone(),
            config.marker.clone(),
        );
        Ok(guard.ensure_fetched().await?)
    }
}
