// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Worker identity within a statically sized group.
//!
//! The group size is fixed at deployment time. Exactly one worker holds rank 0
//! for the lifetime of the group; that worker is the loader and every other
//! worker is a follower. Nothing here enforces uniqueness of rank 0 across
//! processes, it is a precondition of the deployment.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Environment variables consulted for the rank, in order.
pub const DEFAULT_RANK_ENVS: &[&str] = &["RANK", "LOCAL_RANK"];

/// Position of this process in its worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerRank(u32);

impl WorkerRank {
    pub const LEADER: WorkerRank = WorkerRank(0);

    pub fn new(rank: u32) -> Self {
        Self(rank)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// The leader downloads the model; everyone else waits for it.
    pub fn is_leader(&self) -> bool {
        self.0 == 0
    }

    /// Returns `self` if the rank is valid for a group of `group_size`.
    pub fn check_in(self, group_size: GroupSize) -> Result<Self, ConfigurationError> {
        if self.0 >= group_size.get() {
            return Err(ConfigurationError::RankOutOfRange {
                rank: self.0,
                group_size: group_size.get(),
            });
        }
        Ok(self)
    }
}

impl fmt::Display for WorkerRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Total number of workers cooperating on one model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GroupSize(u32);

impl GroupSize {
    pub fn new(size: u32) -> Result<Self, ConfigurationError> {
        if size == 0 {
            return Err(ConfigurationError::EmptyGroup);
        }
        Ok(Self(size))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for GroupSize {
    type Error = ConfigurationError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        GroupSize::new(size)
    }
}

impl From<GroupSize> for u32 {
    fn from(size: GroupSize) -> u32 {
        size.0
    }
}

impl fmt::Display for GroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads the worker rank from process-local configuration.
///
/// A missing or unparsable rank is an unsupported deployment and must abort
/// startup before any fetch or barrier call is made.
#[derive(Debug, Clone)]
pub struct RankGate {
    names: Vec<String>,
}

impl Default for RankGate {
    fn default() -> Self {
        Self::new(DEFAULT_RANK_ENVS.iter().map(|s| s.to_string()).collect())
    }
}

impl RankGate {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Resolve the rank from the process environment.
    pub fn resolve(&self, group_size: GroupSize) -> Result<WorkerRank, ConfigurationError> {
        self.resolve_with(|name| std::env::var(name).ok(), group_size)
    }

    /// Resolve the rank using `lookup` in place of the environment.
    ///
    /// The first name that yields a value wins, even if that value is invalid.
    pub fn resolve_with<F>(
        &self,
        lookup: F,
        group_size: GroupSize,
    ) -> Result<WorkerRank, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (name, value) = self
            .names
            .iter()
            .find_map(|name| lookup(name).map(|value| (name, value)))
            .ok_or_else(|| ConfigurationError::RankUnset {
                names: self.names.clone(),
            })?;

        let rank = value
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigurationError::RankInvalid {
                name: name.clone(),
                value: value.clone(),
            })?;

        WorkerRank::new(rank).check_in(group_size)
    }
}
