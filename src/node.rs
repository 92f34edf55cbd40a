//! 节点
//! Node
//!
//! 将存储、调度器、回调分发器和复制器组装成一个运行中的节点，
//! 并运行投递结果循环：成功后复制最新状态，失败后写入审计记录。
//!
//! Wires the store, the scheduler, the callback dispatcher and the
//! replicator into a running node, and runs the delivery-outcome loop:
//! a successful callback replicates the post-firing state, a failed one is
//! recorded on the timer's audit trail.


use crate::callback::{
    CallbackTransport, DeliveryOutcome, DispatcherHandle, DispatcherStats, HttpCallbackTransport,
    start_dispatcher,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::replication::{HttpPeerTransport, PeerTransport, ReplicationStats, Replicator};
use crate::scheduler::{SchedulerHandle, SchedulerStats, start_scheduler};
use crate::store::{TimerStore, UpsertOutcome};
use crate::timer::{AuditEntry, NodeId, ReplicaDocument, ReplicaEntry, Timer, TimerId, TimerSpec};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// 节点统计信息
/// Node statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeStats {
    pub node: NodeId,
    pub scheduler: SchedulerStats,
    pub callbacks: DispatcherStats,
    pub replication: ReplicationStats,
}

/// 运行中的定时器节点
/// A running timer node
pub struct TimerNode<P: PeerTransport = HttpPeerTransport> {
    config: Config,
    scheduler: SchedulerHandle,
    dispatcher: DispatcherHandle,
    replicator: Arc<Replicator<P>>,
    outcomes: JoinHandle<()>,
}

impl TimerNode<HttpPeerTransport> {
    /// 使用HTTP传输启动节点
    /// Start a node with the HTTP transports
    ///
    /// Callbacks and peer pushes each get their own pooled client.
    pub fn start(config: Config) -> Self {
        Self::start_with(config, HttpCallbackTransport::default(), HttpPeerTransport::default())
    }
}

impl<P: PeerTransport> TimerNode<P> {
    /// 使用给定的传输启动节点
    /// Start a node on the given transports
    pub fn start_with<T: CallbackTransport>(config: Config, callbacks: T, peers: P) -> Self {
        let local = config.local_node().clone();

        let replicator = Arc::new(Replicator::new(
            local.clone(),
            config.peers(),
            peers,
            config.replication.clone(),
        ));
        let store = TimerStore::new(
            local.clone(),
            config.node.instance_id,
            config.replication.replica_stagger,
            &config.scheduler,
        );

        let (dispatcher, outcome_rx) = start_dispatcher(callbacks, config.callback.clone());
        let scheduler = start_scheduler(store, dispatcher.clone(), config.scheduler.command_buffer);
        let outcomes = tokio::spawn(run_outcomes(outcome_rx, scheduler.clone(), replicator.clone()));

        if config.replication.resync_on_start && !config.peers().is_empty() {
            tokio::spawn(resync(scheduler.clone(), replicator.clone()));
        }

        info!(
            node = %local,
            peers = config.peers().len(),
            default_factor = config.replication.default_factor,
            "Timer node started"
        );

        Self {
            config,
            scheduler,
            dispatcher,
            replicator,
            outcomes,
        }
    }

    pub fn local(&self) -> &NodeId {
        self.config.local_node()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 创建并复制一个定时器
    /// Create and replicate a timer
    ///
    /// The record stays pending, and never fires, until the creation quorum
    /// acknowledges. On a shortfall it is discarded and the error is returned.
    /// The work runs on its own task: if the caller goes away before the
    /// outcome is known the creation is rolled back instead of activated.
    ///
    /// 在达到创建法定人数之前，记录保持待定且不会触发。若未达到，记录被丢弃并返回错误。
    /// 若调用方在结果确定前离开，创建会被回滚而不是激活。
    pub async fn create(&self, spec: TimerSpec) -> Result<Timer> {
        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(settle_creation(
            spec,
            self.scheduler.clone(),
            self.replicator.clone(),
            result_tx,
        ));
        result_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// 应用对端推送的副本文档
    /// Apply a replica document pushed by a peer
    pub async fn upsert(&self, id: TimerId, document: ReplicaDocument) -> Result<UpsertOutcome> {
        let outcome = self.scheduler.upsert(id, document).await?;
        trace!(timer_id = %id, ?outcome, "Replica upsert");
        Ok(outcome)
    }

    pub async fn get(&self, id: TimerId) -> Result<Timer> {
        self.scheduler.get(id).await
    }

    /// 删除定时器并在后台复制墓碑
    /// Delete a timer and replicate the tombstone in the background
    pub async fn delete(&self, id: TimerId) -> Result<()> {
        let tombstone = self.scheduler.delete(id).await?;
        info!(timer_id = %id, sequence_number = tombstone.sequence_number, "Timer deleted");

        let replicator = self.replicator.clone();
        tokio::spawn(async move {
            if let Err(err) = replicator.replicate_update(&tombstone).await {
                debug!(timer_id = %tombstone.id, error = %err, "Tombstone replication incomplete");
            }
        });
        Ok(())
    }

    /// 列出副本集包含 `node` 的定时器
    /// List the timers whose replica set contains `node`
    pub async fn replicas_for(&self, node: NodeId) -> Result<Vec<ReplicaEntry>> {
        self.scheduler.timers_for_node(node).await
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        Ok(NodeStats {
            node: self.local().clone(),
            scheduler: self.scheduler.stats().await?,
            callbacks: self.dispatcher.stats().await?,
            replication: self.replicator.stats(),
        })
    }

    /// 关闭节点。调度器先停止，然后是分发器。
    /// Shutdown the node. The scheduler stops first, then the dispatcher.
    pub async fn shutdown(&self) {
        if let Err(err) = self.scheduler.shutdown().await {
            debug!(error = %err, "Scheduler already stopped");
        }
        if let Err(err) = self.dispatcher.shutdown().await {
            debug!(error = %err, "Dispatcher already stopped");
        }
        self.outcomes.abort();
        info!(node = %self.local(), "Timer node stopped");
    }
}

async fn settle_creation<P: PeerTransport>(
    spec: TimerSpec,
    scheduler: SchedulerHandle,
    replicator: Arc<Replicator<P>>,
    result_tx: oneshot::Sender<Result<Timer>>,
) {
    let result = create_replicated(spec, &scheduler, &replicator, &result_tx).await;
    if let Err(Error::ChannelClosed) = &result {
        debug!("Scheduler stopped during creation");
    }
    let _ = result_tx.send(result);
}

async fn create_replicated<P: PeerTransport>(
    spec: TimerSpec,
    scheduler: &SchedulerHandle,
    replicator: &Replicator<P>,
    caller: &oneshot::Sender<Result<Timer>>,
) -> Result<Timer> {
    let factor = spec.replication_factor;
    let mut timer = scheduler.create(spec).await?;
    timer.replicas = replicator.placement(timer.id, factor);

    let report = match replicator.replicate_on_create(&timer).await {
        Ok(report) => report,
        Err(err) => {
            scheduler.discard(timer.id).await?;
            return Err(err);
        }
    };

    // nobody would learn the id
    if caller.is_closed() {
        scheduler.discard(timer.id).await?;
        replicator.abandon_creation(&timer).await;
        return Err(Error::Timeout);
    }

    scheduler.activate(timer.id, timer.replicas.clone()).await?;
    if report.is_under_replicated() {
        scheduler
            .record_audit(
                timer.id,
                AuditEntry::UnderReplicated {
                    live: report.live,
                    wanted: report.wanted,
                },
            )
            .await?;
    }

    info!(
        timer_id = %timer.id,
        interval_ms = timer.interval.as_millis() as u64,
        repeat_count = timer.repeat_count,
        replicas = ?timer.replicas,
        "Timer created"
    );
    Ok(timer)
}

/// Turns delivery outcomes into replication and audit entries.
async fn run_outcomes<P: PeerTransport>(
    mut outcome_rx: mpsc::Receiver<DeliveryOutcome>,
    scheduler: SchedulerHandle,
    replicator: Arc<Replicator<P>>,
) {
    while let Some(outcome) = outcome_rx.recv().await {
        match outcome {
            DeliveryOutcome::Delivered { firing, .. } => {
                let scheduler = scheduler.clone();
                let replicator = replicator.clone();
                tokio::spawn(async move {
                    let timer = firing.timer;
                    match replicator.replicate_update(&timer).await {
                        Ok(_) => {}
                        Err(Error::UnderReplicated { live, wanted, .. }) => {
                            let entry = AuditEntry::UnderReplicated { live, wanted };
                            if scheduler.record_audit(timer.id, entry).await.is_err() {
                                debug!(timer_id = %timer.id, "Scheduler stopped, audit entry dropped");
                            }
                        }
                        Err(err) => {
                            debug!(timer_id = %timer.id, error = %err, "Replication after firing aborted");
                        }
                    }
                });
            }
            DeliveryOutcome::Failed {
                firing,
                attempts,
                reason,
            } => {
                let id = firing.id();
                let entry = AuditEntry::CallbackFailed {
                    sequence_number: firing.sequence_number,
                    attempts,
                    reason,
                };
                if scheduler.record_audit(id, entry).await.is_err() {
                    debug!(timer_id = %id, "Scheduler stopped, audit entry dropped");
                    break;
                }
            }
        }
    }
}

/// Pulls back the timers this node holds a copy of, after a restart.
async fn resync<P: PeerTransport>(scheduler: SchedulerHandle, replicator: Arc<Replicator<P>>) {
    let entries = replicator.fetch_own_replicas().await;
    let fetched = entries.len();
    let mut applied = 0;

    for entry in entries {
        match scheduler.upsert(entry.id, entry.document).await {
            Ok(outcome) if outcome.applied() => applied += 1,
            Ok(_) => {}
            Err(Error::ChannelClosed) => {
                warn!("Scheduler stopped during resync");
                return;
            }
            Err(err) => error!(timer_id = %entry.id, error = %err, "Peer sent an invalid replica"),
        }
    }
    info!(fetched, applied, "Resync finished");
}
