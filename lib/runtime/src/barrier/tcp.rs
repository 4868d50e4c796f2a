// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Leader/worker barrier over TCP.
//!
//! Rank 0 binds `addr` when it reaches the barrier and accepts one connection
//! per follower. Followers keep dialing until the leader is listening, send a
//! hello frame and block on the reply. Once every follower has checked in the
//! leader answers each of them with a release byte.
//!
//! Hello frame: `MAGIC (u32 BE) | rank (u32 BE)`.
//! Reply: one byte, [`RELEASE`] or [`REJECT`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{Barrier, bounded};
use crate::error::BarrierError;
use crate::rank::{GroupSize, WorkerRank};

const MAGIC: u32 = 0x5348_4231; // "SHB1"
const RELEASE: u8 = 0x01;
const REJECT: u8 = 0xFF;

#[derive(Debug, Clone)]
pub struct TcpBarrier {
    addr: String,
    rank: WorkerRank,
    retry_interval: Duration,
    timeout: Option<Duration>,
}

impl TcpBarrier {
    pub fn new(addr: impl Into<String>, rank: WorkerRank) -> Self {
        Self {
            addr: addr.into(),
            rank,
            retry_interval: Duration::from_millis(200),
            timeout: None,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn leader_wait(&self, group_size: GroupSize) -> Result<(), BarrierError> {
        let listener = TcpListener::bind(&self.addr).await?;
        tracing::debug!(addr = %listener.local_addr()?, "barrier leader listening");

        let expected = group_size.as_usize() - 1;
        let mut followers: HashMap<u32, TcpStream> = HashMap::with_capacity(expected);

        while followers.len() < expected {
            let (mut stream, peer) = listener.accept().await?;

            let hello = async {
                let magic = stream.read_u32().await?;
                let rank = stream.read_u32().await?;
                Ok::<_, std::io::Error>((magic, rank))
            };
            let (magic, rank) = match hello.await {
                Ok(hello) => hello,
                Err(e) => {
                    tracing::warn!(%peer, "dropping barrier connection without hello: {e}");
                    continue;
                }
            };

            if magic != MAGIC {
                tracing::warn!(%peer, magic, "dropping barrier connection with bad magic");
                continue;
            }
            if rank == 0 || rank >= group_size.get() || followers.contains_key(&rank) {
                tracing::warn!(%peer, rank, "rejecting barrier participant");
                let _ = stream.write_u8(REJECT).await;
                continue;
            }

            tracing::debug!(%peer, rank, arrived = followers.len() + 2, "follower reached barrier");
            followers.insert(rank, stream);
        }

        for (rank, mut stream) in followers {
            stream.write_u8(RELEASE).await?;
            stream.flush().await?;
            tracing::trace!(rank, "released follower");
        }
        Ok(())
    }

    async fn follower_wait(&self) -> Result<(), BarrierError> {
        let mut stream = loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    tracing::trace!(addr = %self.addr, "barrier leader not reachable yet: {e}");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        };

        stream.write_u32(MAGIC).await?;
        stream.write_u32(self.rank.get()).await?;
        stream.flush().await?;

        match stream.read_u8().await? {
            RELEASE => Ok(()),
            REJECT => Err(BarrierError::Protocol(format!(
                "leader at {} rejected rank {}",
                self.addr, self.rank
            ))),
            other => Err(BarrierError::Protocol(format!(
                "unexpected reply byte {other:#04x} from {}",
                self.addr
            ))),
        }
    }
}

#[async_trait]
impl Barrier for TcpBarrier {
    async fn wait_for_all(&self, group_size: GroupSize) -> Result<(), BarrierError> {
        self.rank
            .check_in(group_size)
            .map_err(|e| BarrierError::Protocol(e.to_string()))?;

        if group_size.get() == 1 {
            return Ok(());
        }

        bounded(self.timeout, async {
            if self.rank.is_leader() {
                self.leader_wait(group_size).await
            } else {
                self.follower_wait().await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(n: u32) -> GroupSize {
        GroupSize::new(n).unwrap()
    }

    fn free_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn barrier(addr: &str, rank: u32) -> TcpBarrier {
        TcpBarrier::new(addr, WorkerRank::new(rank)).with_retry_interval(Duration::from_millis(10))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_followers_wait_for_late_leader() {
        let addr = free_addr();

        let mut followers = Vec::new();
        for rank in 1..4 {
            let barrier = barrier(&addr, rank);
            followers.push(tokio::spawn(async move { barrier.wait_for_all(group(4)).await }));
        }

        // Leader has not started listening; followers keep dialing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(followers.iter().all(|h| !h.is_finished()));

        barrier(&addr, 0).wait_for_all(group(4)).await.unwrap();
        for follower in followers {
            follower.await.unwrap().unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_rank_rejected() {
        let addr = free_addr();

        let leader = {
            let barrier = barrier(&addr, 0).with_timeout(Some(Duration::from_secs(10)));
            tokio::spawn(async move { barrier.wait_for_all(group(3)).await })
        };
        let first = {
            let barrier = barrier(&addr, 1);
            tokio::spawn(async move { barrier.wait_for_all(group(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = barrier(&addr, 1).wait_for_all(group(3)).await.unwrap_err();
        assert!(matches!(err, BarrierError::Protocol(_)), "{err}");
        assert!(!first.is_finished());

        barrier(&addr, 2).wait_for_all(group(3)).await.unwrap();
        first.await.unwrap().unwrap();
        leader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_single_member_skips_network() {
        barrier("256.0.0.1:1", 0).wait_for_all(group(1)).await.unwrap();
    }
}
