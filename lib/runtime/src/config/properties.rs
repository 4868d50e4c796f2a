// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `serving.properties` support.
//!
//! Model-serving containers are commonly configured with a Java-style
//! properties file next to the model code:
//!
//! ```text
//! engine=DeepSpeed
//! option.tensor_parallel_degree=4
//! option.s3url=s3://my-bucket/models/bloom-176b/
//! option.dtype=fp16
//! ```
//!
//! [`ServingProperties`] is a figment [`Provider`] that maps the recognized
//! keys onto [`super::WorkerConfig`] fields. Unknown keys are ignored.
//!
//! `engine` names the serving container's backend, not a shardhost engine, so
//! it is logged and never overrides `engine` from TOML or `SHARDHOST_ENGINE`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    Error, Metadata, Profile, Provider, Source,
    value::{Dict, Map, Tag, Value},
};

use crate::error::ConfigurationError;

const CONTAINER_ENGINE_KEY: &str = "engine";

/// Property key -> config key path.
const KEY_MAP: &[(&str, &str)] = &[
    ("option.tensor_parallel_degree", "group_size"),
    ("option.s3url", "model_source"),
    ("option.model_id", "model_source"),
    ("option.dtype", "precision"),
    ("option.cache_dir", "cache_dir"),
    ("option.model_loading_timeout", "startup_timeout_secs"),
    ("option.barrier_backend", "barrier.backend"),
    ("option.barrier_addr", "barrier.addr"),
];

#[derive(Debug, Clone, Default)]
pub struct ServingProperties {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl ServingProperties {
    /// Parse properties text. Lines starting with `#` or `!` are comments;
    /// keys and values are split on the first `=` or `:`.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                tracing::debug!("ignoring property line without separator: {line}");
                continue;
            };
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            entries.insert(key.to_string(), value.to_string());
        }
        Self { path: None, entries }
    }

    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut properties = Self::parse(&text);
        properties.path = Some(path.to_path_buf());
        Ok(properties)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn to_dict(&self) -> Dict {
        let mut dict = Dict::new();
        for (key, value) in &self.entries {
            if key == CONTAINER_ENGINE_KEY {
                tracing::info!(
                    container_engine = %value,
                    "ignoring serving.properties engine; set SHARDHOST_ENGINE to choose the model engine"
                );
                continue;
            }
            match KEY_MAP.iter().find(|(property, _)| property == key) {
                Some((_, target)) => {
                    let value: Value = match value.parse() {
                        Ok(value) => value,
                        Err(never) => match never {},
                    };
                    insert_path(&mut dict, target, value);
                }
                None => tracing::trace!("property {key} has no worker config mapping"),
            }
        }
        dict
    }
}

fn insert_path(dict: &mut Dict, path: &str, value: Value) {
    match path.split_once('.') {
        Some((head, rest)) => {
            let entry = dict
                .entry(head.to_string())
                .or_insert_with(|| Value::Dict(Tag::Default, Dict::new()));
            if let Value::Dict(_, inner) = entry {
                insert_path(inner, rest, value);
            }
        }
        None => {
            dict.insert(path.to_string(), value);
        }
    }
}

impl Provider for ServingProperties {
    fn metadata(&self) -> Metadata {
        let metadata = Metadata::named("serving.properties");
        match &self.path {
            Some(path) => metadata.source(Source::File(path.clone())),
            None => metadata,
        }
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(Profile::Default.collect(self.to_dict()))
    }
}
