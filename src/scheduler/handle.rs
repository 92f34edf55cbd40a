//! 调度器句柄
//! Scheduler handle

use super::command::{SchedulerCommand, SchedulerStats};
use crate::error::{Error, Result};
use crate::store::UpsertOutcome;
use crate::timer::{AuditEntry, NodeId, ReplicaDocument, ReplicaEntry, Timer, TimerId, TimerSpec};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// 调度器的句柄，可以在任务之间克隆和共享
/// Handle to the scheduler, cheap to clone and share between tasks
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self { command_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// 创建待定定时器
    /// Create a pending timer
    pub async fn create(&self, spec: TimerSpec) -> Result<Timer> {
        self.request(|response_tx| SchedulerCommand::Create { spec, response_tx })
            .await?
    }

    /// 激活待定定时器
    /// Activate a pending timer
    pub async fn activate(&self, id: TimerId, replicas: Vec<NodeId>) -> Result<()> {
        self.request(|response_tx| SchedulerCommand::Activate {
            id,
            replicas,
            response_tx,
        })
        .await?
    }

    /// 丢弃待定定时器
    /// Discard a pending timer
    pub async fn discard(&self, id: TimerId) -> Result<bool> {
        self.request(|response_tx| SchedulerCommand::Discard { id, response_tx })
            .await
    }

    /// 查询定时器
    /// Look up a timer
    pub async fn get(&self, id: TimerId) -> Result<Timer> {
        self.request(|response_tx| SchedulerCommand::Get { id, response_tx })
            .await?
    }

    /// 删除定时器
    /// Delete a timer
    pub async fn delete(&self, id: TimerId) -> Result<Timer> {
        self.request(|response_tx| SchedulerCommand::Delete { id, response_tx })
            .await?
    }

    /// 应用副本
    /// Apply a replica
    pub async fn upsert(&self, id: TimerId, document: ReplicaDocument) -> Result<UpsertOutcome> {
        self.request(|response_tx| SchedulerCommand::Upsert {
            id,
            document,
            response_tx,
        })
        .await?
    }

    /// 追加审计记录，不等待结果
    /// Append an audit entry without waiting for the result
    pub async fn record_audit(&self, id: TimerId, entry: AuditEntry) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::RecordAudit { id, entry })
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// 列出某节点持有副本的定时器
    /// List the timers a node holds a copy of
    pub async fn timers_for_node(&self, node: NodeId) -> Result<Vec<ReplicaEntry>> {
        self.request(|response_tx| SchedulerCommand::TimersForNode { node, response_tx })
            .await
    }

    /// 获取统计信息
    /// Get statistics
    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.request(|response_tx| SchedulerCommand::GetStats { response_tx })
            .await
    }

    /// 关闭调度器
    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.command_tx.send(SchedulerCommand::Shutdown).await {
            warn!(error = %err, "Scheduler already stopped");
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }
}
