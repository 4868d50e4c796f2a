// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Shardhost LLM
//!
//! Model materialization for a group of tensor-parallel workers and the
//! inference endpoint served once the model is up.

pub mod coordinator;
pub mod engine;
pub mod fetch;
pub mod handler;
pub mod http;
pub mod marker;
pub mod protocols;
pub mod storage;

pub use coordinator::{Coordinator, CoordinatorConfig, ReadyWorker, WorkerPhase};
pub use engine::{EngineBuilder, ModelHandle, ModelSpec};
pub use fetch::{FetchOnceGuard, FetchOutcome};
pub use handler::ServerState;
pub use storage::{ModelLocation, ModelSource};
