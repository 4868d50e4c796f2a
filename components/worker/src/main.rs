// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use shardhost_llm::coordinator::{BarrierFactory, Coordinator, CoordinatorConfig};
use shardhost_llm::engine::EngineBuilder;
use shardhost_llm::marker::FileMarker;
use shardhost_llm::storage::{self, ModelLocation};
use shardhost_llm::{ServerState, http};
use shardhost_runtime::{
    CancellationToken, Result, StartupError, WorkerConfig, WorkerRank, barrier, error, logging,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file merged over the system config
    #[arg(long, env = "SHARDHOST_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// serving.properties file merged over the TOML config
    #[arg(long, env = "SHARDHOST_PROPERTIES_PATH")]
    properties: Option<PathBuf>,

    /// Host for the HTTP service (rank 0 only)
    #[arg(long)]
    host: Option<String>,

    /// Port number for the HTTP service (rank 0 only)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    app(config, cancel_token).await
}

fn load_config(args: &Args) -> Result<WorkerConfig> {
    let mut figment = WorkerConfig::figment_with(args.config.clone(), args.properties.clone())?;
    if let Some(host) = &args.host {
        figment = figment.merge(("http.host", host));
    }
    if let Some(port) = args.port {
        figment = figment.merge(("http.port", port));
    }
    Ok(WorkerConfig::extract_from(figment)?)
}

async fn app(config: WorkerConfig, cancel_token: CancellationToken) -> Result<()> {
    let group_size = config.group_size()?;
    let rank = config.rank_gate().resolve(group_size)?;
    let location: ModelLocation = config.model_source.parse()?;

    tracing::info!(
        %rank,
        %group_size,
        source = %location,
        cache_dir = %config.cache_dir.display(),
        engine = %config.engine,
        "starting worker"
    );

    // Bound before startup so a taken port aborts before any fetch.
    let listener = if rank.is_leader() {
        Some(http::bind(&config.http.host, config.http.port).await?)
    } else {
        None
    };

    let barrier_config = config.barrier.clone();
    let barrier_root = config.cache_dir.clone();
    let barrier: BarrierFactory = Arc::new(move |rank: WorkerRank| {
        barrier::from_config(&barrier_config, &barrier_root, rank, group_size)
    });

    let coordinator = Coordinator::new(
        CoordinatorConfig::builder()
            .rank_gate(config.rank_gate())
            .group_size(group_size)
            .location(location.clone())
            .cache_dir(config.cache_dir.clone())
            .precision(config.precision)
            .source(storage::source_for(&location, &config.transfer)?)
            .marker(Arc::new(FileMarker::new(config.marker_path())))
            .barrier(barrier)
            .engine(EngineBuilder::from_name(&config.engine)?)
            .build()?,
    );

    // Rank 0 answers health checks while the model is still loading.
    let state = Arc::new(ServerState::new(coordinator.subscribe()));
    let server = listener.map(|listener| {
        tokio::spawn(http::serve(listener, state.clone(), cancel_token.clone()))
    });

    let startup = async {
        match config.startup_timeout() {
            Some(limit) => match tokio::time::timeout(limit, coordinator.run()).await {
                Ok(result) => result.map_err(report_startup_error),
                Err(_) => Err(error!("startup did not finish within {limit:?}")),
            },
            None => coordinator.run().await.map_err(report_startup_error),
        }
    };

    let ready = tokio::select! {
        ready = startup => ready?,
        _ = cancel_token.cancelled() => {
            tracing::warn!(phase = %coordinator.phase(), "shutdown requested during startup");
            return Ok(());
        }
    };

    tracing::info!(rank = %ready.rank, "worker ready");
    state.install(ready.handle);

    match server {
        Some(server) => server.await??,
        None => {
            // Followers hold their shard; the engine drives them from rank 0.
            cancel_token.cancelled().await;
        }
    }

    tracing::info!("worker stopped");
    Ok(())
}

fn report_startup_error(err: StartupError) -> anyhow::Error {
    tracing::error!(error_type = %err.error_type(), "startup failed: {err}");
    err.into()
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
    cancel_token.cancel();
}
