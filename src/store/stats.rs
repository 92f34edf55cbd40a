//! 定时器存储统计信息
//! Timer store statistics

use serde::Serialize;

/// 定时器存储统计信息
/// Timer store statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreStats {
    /// 已调度的活跃定时器数
    /// Scheduled live timers
    pub live: usize,
    /// 等待创建法定人数的定时器数
    /// Timers waiting for their creation quorum
    pub pending: usize,
    /// 尚未回收的墓碑数
    /// Tombstones not yet collected
    pub tombstones: usize,
    /// 排序索引中的条目数
    /// Entries in the ordering index
    pub indexed: usize,
    /// 本节点创建的定时器总数
    /// Timers created on this node
    pub created_total: u64,
    /// 触发总次数
    /// Firings performed
    pub fired_total: u64,
    /// 已应用的副本写入总数
    /// Replica writes applied
    pub replicas_applied_total: u64,
    /// 被忽略的副本写入总数（重复或过期）
    /// Replica writes ignored as duplicate or stale
    pub replicas_ignored_total: u64,
    /// 已回收的墓碑总数
    /// Tombstones collected
    pub purged_total: u64,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StoreStats {{ live: {}, pending: {}, tombstones: {}, fired: {}, replicas: {}/{} }}",
            self.live,
            self.pending,
            self.tombstones,
            self.fired_total,
            self.replicas_applied_total,
            self.replicas_applied_total + self.replicas_ignored_total
        )
    }
}
