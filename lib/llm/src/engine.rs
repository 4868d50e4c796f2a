// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model construction from the local cache.
//!
//! [`EngineBuilder::build`] discovers the artifacts, loads the tokenizer and
//! hands both to an [`Engine`], which attaches this worker's shard to the
//! tensor-parallel runtime. Every failure here is fatal for the worker.

pub mod echo;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use derive_builder::Builder;
use tokenizers::Tokenizer;
use tokio::fs;

use shardhost_runtime::config::Precision;
use shardhost_runtime::error::{ConfigurationError, ConstructionError};
use shardhost_runtime::rank::{GroupSize, WorkerRank};

use crate::protocols::GenerationOptions;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHT_EXTENSIONS: &[&str] = &["safetensors", "bin", "pt"];

/// What a worker asks the engine to construct.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(pattern = "owned")]
pub struct ModelSpec {
    #[builder(setter(into))]
    pub model_dir: PathBuf,

    pub rank: WorkerRank,

    pub group_size: GroupSize,

    #[builder(default)]
    pub precision: Precision,
}

impl ModelSpec {
    pub fn builder() -> ModelSpecBuilder {
        ModelSpecBuilder::default()
    }
}

/// Files a model directory must contain before construction is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    /// Sorted by file name.
    pub weights: Vec<PathBuf>,
}

impl ModelArtifacts {
    pub async fn discover(dir: &Path) -> Result<Self, ConstructionError> {
        let missing = |kind| ConstructionError::MissingArtifact {
            dir: dir.to_path_buf(),
            kind,
        };
        let io = |source| ConstructionError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let config = dir.join(CONFIG_FILE);
        if !is_file(&config).await {
            return Err(missing("config.json"));
        }

        let tokenizer = dir.join(TOKENIZER_FILE);
        if !is_file(&tokenizer).await {
            return Err(missing("tokenizer.json"));
        }

        let mut entries = fs::read_dir(dir).await.map_err(io)?;
        let mut weights = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            let path = entry.path();
            let is_weight = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| WEIGHT_EXTENSIONS.contains(&ext));
            if is_weight && entry.file_type().await.map_err(io)?.is_file() {
                weights.push(path);
            }
        }
        if weights.is_empty() {
            return Err(missing("weight files (*.safetensors, *.bin, *.pt)"));
        }
        weights.sort();

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

/// Text generation for one constructed shard.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns exactly one output per prompt, in prompt order.
    async fn generate(
        &self,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> anyhow::Result<Vec<String>>;
}

/// The tensor-parallel inference engine.
#[async_trait]
pub trait Engine: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn load_shard(
        &self,
        spec: &ModelSpec,
        artifacts: &ModelArtifacts,
        tokenizer: Arc<Tokenizer>,
    ) -> anyhow::Result<Arc<dyn TextGenerator>>;
}

/// A constructed shard owned by one worker.
#[derive(Clone)]
pub struct ModelHandle {
    pub generator: Arc<dyn TextGenerator>,
    pub tokenizer: Arc<Tokenizer>,
    pub spec: ModelSpec,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("spec", &self.spec)
            .field("vocab_size", &self.tokenizer.get_vocab_size(true))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct EngineBuilder {
    engine: Arc<dyn Engine>,
}

impl EngineBuilder {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    /// Look up a built-in engine by its configured name.
    pub fn from_name(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            echo::ENGINE_NAME => Ok(Self::new(Arc::new(echo::EchoEngine))),
            other => Err(ConfigurationError::Unsupported(format!(
                "engine '{other}'; available engines: {}",
                echo::ENGINE_NAME
            ))),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn build(&self, spec: ModelSpec) -> Result<ModelHandle, ConstructionError> {
        let artifacts = ModelArtifacts::discover(&spec.model_dir).await?;
        tracing::debug!(
            weights = artifacts.weights.len(),
            dir = %spec.model_dir.display(),
            "model artifacts found"
        );

        let tokenizer = Arc::new(load_tokenizer(&artifacts.tokenizer).await?);

        let generator = self
            .engine
            .load_shard(&spec, &artifacts, tokenizer.clone())
            .await
            .map_err(|source| ConstructionError::Engine {
                engine: self.engine.name().to_string(),
                source,
            })?;

        tracing::info!(
            engine = self.engine.name(),
            rank = %spec.rank,
            group_size = %spec.group_size,
            precision = %spec.precision,
            "model shard constructed"
        );
        Ok(ModelHandle {
            generator,
            tokenizer,
            spec,
        })
    }
}

async fn load_tokenizer(path: &Path) -> Result<Tokenizer, ConstructionError> {
    let owned = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || Tokenizer::from_file(owned))
        .await
        .map_err(|e| ConstructionError::Tokenizer {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
    loaded.map_err(|source| ConstructionError::Tokenizer {
        path: path.to_path_buf(),
        source,
    })
}
