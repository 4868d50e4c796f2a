// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reference engine that runs the full startup path without an accelerator.
//!
//! Generation round-trips each prompt through the tokenizer and applies the
//! length options, so output is deterministic and exercises the same artifact
//! set a real engine would load.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokenizers::Tokenizer;

use super::{Engine, ModelArtifacts, ModelSpec, TextGenerator};
use crate::protocols::GenerationOptions;

pub const ENGINE_NAME: &str = "echo";

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoEngine;

#[async_trait]
impl Engine for EchoEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn load_shard(
        &self,
        spec: &ModelSpec,
        artifacts: &ModelArtifacts,
        tokenizer: Arc<Tokenizer>,
    ) -> anyhow::Result<Arc<dyn TextGenerator>> {
        let raw = tokio::fs::read(&artifacts.config)
            .await
            .with_context(|| format!("failed to read {}", artifacts.config.display()))?;
        let config: serde_json::Value = serde_json::from_slice(&raw)
            .with_context(|| format!("{} is not valid JSON", artifacts.config.display()))?;
        let context_length = config
            .get("max_position_embeddings")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        tracing::debug!(
            rank = %spec.rank,
            shards = artifacts.weights.len(),
            ?context_length,
            "echo engine attached"
        );
        Ok(Arc::new(EchoGenerator {
            tokenizer,
            context_length,
        }))
    }
}

struct EchoGenerator {
    tokenizer: Arc<Tokenizer>,
    context_length: Option<usize>,
}

impl EchoGenerator {
    fn echo(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| anyhow::anyhow!("failed to encode prompt: {e}"))?;
        let mut ids = encoding.get_ids().to_vec();

        let limit = match (options.max_length, self.context_length) {
            (Some(max), Some(ctx)) => Some((max as usize).min(ctx)),
            (Some(max), None) => Some(max as usize),
            (None, ctx) => ctx,
        };
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        // Repeat the prompt until min_length tokens are produced.
        if let Some(min) = options.min_length.map(|m| m as usize) {
            if !ids.is_empty() && ids.len() < min {
                let cycle = ids.clone();
                ids.extend(cycle.iter().cycle().take(min - ids.len()));
            }
        }

        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| anyhow::anyhow!("failed to decode output: {e}"))
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(
        &self,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> anyhow::Result<Vec<String>> {
        prompts
            .iter()
            .map(|prompt| self.echo(prompt, options))
            .collect()
    }
}
