//! 复制器
//! Replicator
//!
//! 该模块负责把定时器状态推送到其副本集中的对端节点：
//! - 创建路径：并发推送并阻塞直到达到法定人数，否则创建失败；
//! - 稳态路径：每次成功回调或删除后尽力推送，不阻塞调度器；
//! - 重启时从对端重新同步本节点持有的副本。
//!
//! This module pushes timer state to the peers in its replica set:
//! - creation path: concurrent pushes, blocking until the quorum acknowledges
//!   or failing the creation;
//! - steady-state path: best-effort pushes after every successful callback
//!   or deletion, never blocking the scheduler;
//! - on restart, the copies this node holds are pulled back from peers.
//!
//! Receivers apply pushes with last-writer-wins on the sequence number, so
//! every push is idempotent and safe to retry.

mod health;
mod placement;
mod transport;


pub use health::{PeerHealth, PeerStatus};
pub use placement::place;
pub use transport::{HttpPeerTransport, PeerTransport};

use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::timer::{NodeId, ReplicaDocument, ReplicaEntry, Timer, TimerId};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// 一次复制的结果
/// Result of one replication round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Copies known to hold this state, the local one included.
    /// 已知持有该状态的副本数（包括本地副本）。
    pub live: usize,
    /// Copies the timer asked for.
    /// 定时器请求的副本数。
    pub wanted: usize,
    /// Peers that acknowledged.
    /// 已确认的对端。
    pub acked: Vec<NodeId>,
}

impl ReplicationReport {
    pub fn is_under_replicated(&self) -> bool {
        self.live < self.wanted
    }
}

/// 复制统计信息
/// Replication statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicationStats {
    pub peers: Vec<PeerStatus>,
    pub pushes_total: u64,
    pub push_failures_total: u64,
    pub creations_failed_total: u64,
    pub under_replicated_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushes: AtomicU64,
    push_failures: AtomicU64,
    creations_failed: AtomicU64,
    under_replicated: AtomicU64,
}

/// 复制器，在节点的所有任务之间共享
/// Replicator, shared by every task of the node
pub struct Replicator<P: PeerTransport> {
    local: NodeId,
    members: Vec<NodeId>,
    transport: P,
    config: ReplicationConfig,
    health: PeerHealth,
    permits: Semaphore,
    counters: Counters,
}

impl<P: PeerTransport> Replicator<P> {
    /// `members` are the other nodes of the cluster.
    pub fn new(local: NodeId, members: Vec<NodeId>, transport: P, config: ReplicationConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            local,
            members,
            transport,
            config,
            health: PeerHealth::default(),
            permits,
            counters: Counters::default(),
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn health(&self) -> &PeerHealth {
        &self.health
    }

    /// 计算新定时器的副本集
    /// Compute the replica set of a new timer
    pub fn placement(&self, id: TimerId, factor: u32) -> Vec<NodeId> {
        place(&self.local, &self.members, id, factor)
    }

    /// 创建路径：推送到副本集中的每个对端，直到达到法定人数
    /// Creation path: push to every peer of the replica set until the quorum holds
    ///
    /// Each peer is retried with backoff inside the creation window. If the
    /// acknowledged copies, the local one included, fall short of the quorum
    /// the creation fails with [`Error::ReplicationFailed`] and every peer of
    /// the set receives a tombstone, so no partial timer stays schedulable.
    ///
    /// 每个对端在创建窗口内按退避重试。若确认的副本（含本地）不足法定人数，
    /// 创建以 [`Error::ReplicationFailed`] 失败，副本集中的每个对端都会收到墓碑。
    pub async fn replicate_on_create(&self, timer: &Timer) -> Result<ReplicationReport> {
        let wanted = timer.replication_factor.max(1) as usize;
        let required = self.config.quorum.required(wanted);
        let peers = self.peers_of(timer);
        let deadline = Instant::now() + self.config.create_window;
        let document = ReplicaDocument::from_timer(timer, Instant::now());

        let pushes: Vec<_> = peers
            .iter()
            .map(|peer| self.push_with_retry(peer, timer.id, &document, &self.config.retry, Some(deadline)))
            .collect();
        let acked: Vec<NodeId> = join_all(pushes).await.into_iter().flatten().collect();
        let live = 1 + acked.len();

        if live < required {
            self.counters.creations_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                timer_id = %timer.id,
                acked = live,
                required,
                "Creation quorum not reached, rolling back"
            );
            self.roll_back(timer, &peers).await;
            return Err(Error::ReplicationFailed {
                id: timer.id,
                acked: live,
                required,
            });
        }

        let report = ReplicationReport { live, wanted, acked };
        if report.is_under_replicated() {
            self.counters.under_replicated.fetch_add(1, Ordering::Relaxed);
            warn!(timer_id = %timer.id, live, wanted, "Timer created under-replicated");
        } else {
            debug!(timer_id = %timer.id, live, "Timer replicated");
        }
        Ok(report)
    }

    /// 撤销一次调用方已不再等待的创建
    /// Withdraw a creation whose caller stopped waiting
    ///
    /// The quorum may have held, so every peer of the set gets a tombstone.
    pub async fn abandon_creation(&self, timer: &Timer) {
        self.counters.creations_failed.fetch_add(1, Ordering::Relaxed);
        info!(timer_id = %timer.id, "Creation abandoned by its caller, rolling back");
        self.roll_back(timer, &self.peers_of(timer)).await;
    }

    /// 稳态路径：尽力把最新状态推送到副本集中的对端
    /// Steady-state path: best-effort push of the latest state to the replica set
    ///
    /// Healthy peers are retried within the update window; suspect peers get
    /// a single attempt. At most `max-concurrent` of these run at once. When
    /// a live timer ends up with fewer copies than requested the result is an
    /// [`Error::UnderReplicated`], logged at error level once the local copy
    /// is the only one left.
    ///
    /// 健康的对端在更新窗口内重试；可疑对端只尝试一次。
    pub async fn replicate_update(&self, timer: &Timer) -> Result<ReplicationReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::ChannelClosed)?;

        let wanted = timer.replication_factor.max(1) as usize;
        let peers = self.peers_of(timer);
        let document = ReplicaDocument::from_timer(timer, Instant::now());
        let deadline = Instant::now() + self.config.update_window;
        let single = RetryPolicy::no_retry();

        let pushes: Vec<_> = peers
            .iter()
            .map(|peer| {
                let policy = if self.health.is_suspect(peer) {
                    &single
                } else {
                    &self.config.retry
                };
                self.push_with_retry(peer, timer.id, &document, policy, Some(deadline))
            })
            .collect();
        let acked: Vec<NodeId> = join_all(pushes).await.into_iter().flatten().collect();
        let live = 1 + acked.len();
        let report = ReplicationReport { live, wanted, acked };

        if !timer.is_live() || !report.is_under_replicated() {
            trace!(timer_id = %timer.id, live, sequence_number = timer.sequence_number, "Replicated update");
            return Ok(report);
        }

        self.counters.under_replicated.fetch_add(1, Ordering::Relaxed);
        if live == 1 && wanted > 1 {
            error!(
                timer_id = %timer.id,
                sequence_number = timer.sequence_number,
                wanted,
                "No peer holds this timer, the local copy is the only one left"
            );
        } else {
            warn!(timer_id = %timer.id, live, wanted, "Timer under-replicated");
        }
        Err(Error::UnderReplicated {
            id: timer.id,
            live,
            wanted,
        })
    }

    /// 从对端拉取本节点持有的副本
    /// Pull the copies this node holds back from its peers
    ///
    /// Unreachable peers are skipped. The same timer may come back from
    /// several peers; the store keeps the highest sequence number.
    pub async fn fetch_own_replicas(&self) -> Vec<ReplicaEntry> {
        let fetches: Vec<_> = self
            .members
            .iter()
            .map(|peer| self.fetch_from(peer))
            .collect();
        join_all(fetches).await.into_iter().flatten().collect()
    }

    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            peers: self.health.snapshot(),
            pushes_total: self.counters.pushes.load(Ordering::Relaxed),
            push_failures_total: self.counters.push_failures.load(Ordering::Relaxed),
            creations_failed_total: self.counters.creations_failed.load(Ordering::Relaxed),
            under_replicated_total: self.counters.under_replicated.load(Ordering::Relaxed),
        }
    }

    async fn fetch_from(&self, peer: &NodeId) -> Vec<ReplicaEntry> {
        match self.transport.fetch_for(peer, &self.local).await {
            Ok(entries) => {
                debug!(peer = %peer, count = entries.len(), "Fetched replicas");
                entries
            }
            Err(err) => {
                info!(peer = %peer, error = %err, "Peer unavailable for resync");
                Vec::new()
            }
        }
    }

    /// Replica set members other than this node.
    fn peers_of(&self, timer: &Timer) -> Vec<NodeId> {
        timer
            .replicas
            .iter()
            .filter(|node| **node != self.local)
            .cloned()
            .collect()
    }

    /// Returns the peer when it acknowledged.
    async fn push_with_retry(
        &self,
        peer: &NodeId,
        id: TimerId,
        document: &ReplicaDocument,
        policy: &RetryPolicy,
        deadline: Option<Instant>,
    ) -> Option<NodeId> {
        let (result, attempts) = policy
            .run(self.config.ack_timeout, deadline, || {
                self.counters.pushes.fetch_add(1, Ordering::Relaxed);
                self.transport.push(peer, id, document)
            })
            .await;

        match result {
            Ok(applied) => {
                self.health.record_success(peer);
                trace!(timer_id = %id, peer = %peer, applied, attempts, "Peer acknowledged");
                Some(peer.clone())
            }
            Err(err) => {
                self.counters.push_failures.fetch_add(1, Ordering::Relaxed);
                self.health.record_failure(peer);
                debug!(timer_id = %id, peer = %peer, attempts, error = %err, "Peer did not acknowledge");
                None
            }
        }
    }

    /// Sends a tombstone for a failed creation to every peer of its replica
    /// set. Peers that answered too late may still hold a live copy.
    async fn roll_back(&self, timer: &Timer, peers: &[NodeId]) {
        if peers.is_empty() {
            return;
        }
        let mut tombstone = timer.clone();
        tombstone.become_tombstone();
        let document = ReplicaDocument::from_timer(&tombstone, Instant::now());
        let single = RetryPolicy::no_retry();

        let pushes: Vec<_> = peers
            .iter()
            .map(|peer| self.push_with_retry(peer, timer.id, &document, &single, None))
            .collect();
        let cleaned = join_all(pushes).await.into_iter().flatten().count();
        if cleaned < peers.len() {
            warn!(
                timer_id = %timer.id,
                unreached = peers.len() - cleaned,
                "Rollback did not reach every peer"
            );
        }
    }
}
