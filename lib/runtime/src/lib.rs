// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shardhost runtime: worker identity, configuration, logging and the group
//! barrier shared by every worker process.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod barrier;
pub mod config;
pub mod error;
pub mod logging;
pub mod rank;

pub use barrier::Barrier;
pub use config::{Precision, WorkerConfig};
pub use error::{
    BarrierError, ConfigurationError, ConstructionError, ErrorType, StartupError, TransferError,
};
pub use rank::{GroupSize, RankGate, WorkerRank};
pub use tokio_util::sync::CancellationToken;
