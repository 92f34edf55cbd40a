//! 调度器命令
//! Scheduler commands

use crate::error::Result;
use crate::store::{StoreStats, UpsertOutcome};
use crate::timer::{AuditEntry, NodeId, ReplicaDocument, ReplicaEntry, Timer, TimerId, TimerSpec};
use serde::Serialize;
use tokio::sync::oneshot;

/// 发送给调度器的命令
/// Commands sent to the scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// 创建待定定时器，返回其快照
    /// Create a pending timer and return its snapshot
    Create {
        spec: TimerSpec,
        response_tx: oneshot::Sender<Result<Timer>>,
    },

    /// 设置副本集并开始调度
    /// Set the replica set and start scheduling
    Activate {
        id: TimerId,
        replicas: Vec<NodeId>,
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// 丢弃创建失败的待定定时器
    /// Drop a pending timer whose creation failed
    Discard {
        id: TimerId,
        response_tx: oneshot::Sender<bool>,
    },

    /// 查询已调度的定时器
    /// Look up a scheduled timer
    Get {
        id: TimerId,
        response_tx: oneshot::Sender<Result<Timer>>,
    },

    /// 删除定时器，返回墓碑
    /// Delete a timer and return its tombstone
    Delete {
        id: TimerId,
        response_tx: oneshot::Sender<Result<Timer>>,
    },

    /// 应用对端发送的副本
    /// Apply a replica sent by a peer
    Upsert {
        id: TimerId,
        document: ReplicaDocument,
        response_tx: oneshot::Sender<Result<UpsertOutcome>>,
    },

    /// 追加审计记录
    /// Append an audit entry
    RecordAudit { id: TimerId, entry: AuditEntry },

    /// 列出副本集包含某节点的定时器
    /// List timers whose replica set contains a node
    TimersForNode {
        node: NodeId,
        response_tx: oneshot::Sender<Vec<ReplicaEntry>>,
    },

    /// 获取统计信息
    /// Get statistics
    GetStats {
        response_tx: oneshot::Sender<SchedulerStats>,
    },

    /// 关闭调度器
    /// Shutdown the scheduler
    Shutdown,
}

/// 调度器统计信息
/// Scheduler statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerStats {
    pub store: StoreStats,
    /// 处理的命令总数
    /// Commands processed
    pub commands_processed: u64,
    /// 因截止时间到达而唤醒的次数
    /// Wake-ups caused by a deadline
    pub wakeups: u64,
    /// 距下一个截止时间的毫秒数
    /// Milliseconds until the next deadline
    pub next_deadline_in_ms: Option<u64>,
}
