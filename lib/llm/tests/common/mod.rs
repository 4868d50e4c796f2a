// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use shardhost_llm::coordinator::{BarrierFactory, Coordinator, CoordinatorConfig};
use shardhost_llm::engine::EngineBuilder;
use shardhost_llm::marker::FileMarker;
use shardhost_llm::storage::{LocalSource, ModelLocation, ModelSource, TransferReport};
use shardhost_runtime::barrier::Barrier;
use shardhost_runtime::error::{BarrierError, TransferError};
use shardhost_runtime::rank::{GroupSize, RankGate, WorkerRank};

pub const RANK_ENV: &str = "SHARDHOST_TEST_RANK";
pub const MARKER: &str = ".shardhost-complete";

const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": {"type": "Whitespace"},
    "post_processor": null,
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {"[UNK]": 0, "hello": 1, "world": 2},
        "unk_token": "[UNK]"
    }
}"#;

/// Lay out a minimal model repository under `dir`.
pub fn write_model(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("config.json"), r#"{"max_position_embeddings": 8}"#).unwrap();
    std::fs::write(dir.join("tokenizer.json"), TOKENIZER_JSON).unwrap();
    std::fs::write(dir.join("model.safetensors"), "weights").unwrap();
}

pub fn group(n: u32) -> GroupSize {
    GroupSize::new(n).unwrap()
}

pub fn rank_lookup(rank: u32) -> impl Fn(&str) -> Option<String> {
    move |name| (name == RANK_ENV).then(|| rank.to_string())
}

/// Local copy that counts calls and can be held back or made to fail.
#[derive(Debug)]
pub struct TestSource {
    pub calls: AtomicUsize,
    pub fail: bool,
    gate: Option<Arc<Semaphore>>,
}

impl TestSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            gate: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
            gate: None,
        })
    }

    /// Copies block until a permit is added to the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let source = Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            gate: Some(gate.clone()),
        });
        (source, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelSource for TestSource {
    async fn copy_to(
        &self,
        location: &ModelLocation,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail {
            return Err(TransferError::Remote {
                location: location.to_string(),
                source: anyhow::anyhow!("simulated network failure"),
            });
        }
        LocalSource.copy_to(location, dest).await
    }
}

/// Barrier wrapper that counts how many workers called it.
#[derive(Debug)]
pub struct CountingBarrier {
    pub inner: Arc<dyn Barrier>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Barrier for CountingBarrier {
    async fn wait_for_all(&self, group_size: GroupSize) -> Result<(), BarrierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.wait_for_all(group_size).await
    }
}

/// Factory that hands every rank a counted view of `inner`.
pub fn counted(inner: Arc<dyn Barrier>, calls: Arc<AtomicUsize>) -> BarrierFactory {
    Arc::new(move |_rank: WorkerRank| {
        Arc::new(CountingBarrier {
            inner: inner.clone(),
            calls: calls.clone(),
        }) as Arc<dyn Barrier>
    })
}

pub fn coordinator(
    origin: &Path,
    cache_dir: &Path,
    group_size: GroupSize,
    source: Arc<TestSource>,
    barrier: BarrierFactory,
) -> Coordinator {
    let config = CoordinatorConfig::builder()
        .rank_gate(RankGate::new(vec![RANK_ENV.to_string()]))
        .group_size(group_size)
        .location(ModelLocation::Local {
            path: origin.to_path_buf(),
        })
        .cache_dir(cache_dir)
        .source(source)
        .marker(Arc::new(FileMarker::new(cache_dir.join(MARKER))))
        .barrier(barrier)
        .engine(EngineBuilder::from_name("echo").unwrap())
        .build()
        .unwrap();
    Coordinator::new(config)
}
