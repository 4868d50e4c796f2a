// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request handling shared by the HTTP routes.

use std::sync::OnceLock;

use thiserror::Error;
use tokio::sync::watch;
use validator::Validate;

use crate::coordinator::WorkerPhase;
use crate::engine::ModelHandle;
use crate::protocols::{InvocationRequest, InvocationResponse};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model is not ready (phase {0})")]
    NotReady(WorkerPhase),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

/// State shared by every request, created before the coordinator runs.
///
/// The model handle is installed once, when the worker reaches READY.
#[derive(Debug)]
pub struct ServerState {
    phase: watch::Receiver<WorkerPhase>,
    model: OnceLock<ModelHandle>,
}

impl ServerState {
    pub fn new(phase: watch::Receiver<WorkerPhase>) -> Self {
        Self {
            phase,
            model: OnceLock::new(),
        }
    }

    /// State for an already constructed model.
    pub fn ready(handle: ModelHandle) -> Self {
        let (_, phase) = watch::channel(WorkerPhase::Ready);
        let state = Self::new(phase);
        state.install(handle);
        state
    }

    /// Publish the constructed model. Later calls are ignored.
    pub fn install(&self, handle: ModelHandle) {
        if self.model.set(handle).is_err() {
            tracing::warn!("model handle already installed; ignoring");
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.phase().is_ready() && self.model.get().is_some()
    }

    /// Handle one `/invocations` body.
    pub async fn invoke(&self, body: &[u8]) -> Result<InvocationResponse, RequestError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!("empty body, treating as warm-up");
            return Ok(InvocationResponse::WarmUp {});
        }

        let request: InvocationRequest = serde_json::from_slice(body)?;
        let (input, options) = request.into_parts();
        let Some(input) = input else {
            tracing::debug!("warm-up request");
            return Ok(InvocationResponse::WarmUp {});
        };

        options
            .validate()
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;

        let model = match self.model.get() {
            Some(model) if self.phase().is_ready() => model,
            _ => return Err(RequestError::NotReady(self.phase())),
        };

        let prompts = input.clone().into_vec();
        tracing::debug!(prompts = prompts.len(), ?options, "generating");

        let outputs = model
            .generator
            .generate(&prompts, &options)
            .await
            .map_err(RequestError::Generation)?;

        if outputs.len() != prompts.len() {
            return Err(RequestError::Generation(anyhow::anyhow!(
                "engine returned {} outputs for {} prompts",
                outputs.len(),
                prompts.len()
            )));
        }

        Ok(InvocationResponse::Generated {
            generated_text: input.reshape(outputs),
        })
    }
}
