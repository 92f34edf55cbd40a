//! 定时器记录及其生命周期
//! The timer record and its lifecycle

use super::id::{NodeId, TimerId};
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// 定时器触发时调用的HTTP回调
/// HTTP callback invoked when a timer fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub uri: String,
    /// Forwarded byte-for-byte as the request body, never interpreted.
    /// 作为请求体原样转发，从不解析。
    pub opaque: Bytes,
}

/// 经过校验的定时器创建规格
/// Validated timer creation spec
#[derive(Debug, Clone)]
pub struct TimerSpec {
    pub interval: Duration,
    pub repeat_for: Duration,
    pub callback: Callback,
    pub replication_factor: u32,
}

impl TimerSpec {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidSpec("interval must be positive".into()));
        }
        if self.replication_factor < 1 {
            return Err(Error::InvalidSpec("replication-factor must be at least 1".into()));
        }
        Ok(())
    }

    pub fn repeat_count(&self) -> u32 {
        repeat_count(self.interval, self.repeat_for)
    }
}

/// Total firing budget of a timer: `max(1, repeat_for / interval)`.
///
/// 定时器的总触发次数：`max(1, repeat_for / interval)`。
pub fn repeat_count(interval: Duration, repeat_for: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    (repeat_for.as_nanos() / interval.as_nanos()).clamp(1, u32::MAX as u128) as u32
}

/// 定时器状态
/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerState {
    /// Created locally, waiting for its creation quorum. Never fires.
    /// 本地已创建，等待创建法定人数。不会触发。
    Pending,
    /// In the ordering index, waiting for its next occurrence.
    /// 位于排序索引中，等待下一次触发。
    Scheduled,
    /// Exhausted or deleted. Kept as a tombstone until garbage-collected.
    /// 已耗尽或已删除。作为墓碑保留直到被回收。
    Terminal,
}

/// 审计记录条目
/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum AuditEntry {
    CallbackFailed {
        sequence_number: u64,
        attempts: u32,
        reason: String,
    },
    UnderReplicated {
        live: usize,
        wanted: usize,
    },
}

/// Bounded audit trail; the oldest entry is dropped when full.
///
/// 有界审计记录；满时丢弃最旧的条目。
#[derive(Debug, Clone)]
pub struct AuditTrail {
    capacity: usize,
    entries: VecDeque<AuditEntry>,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for AuditTrail {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}

/// 定时器记录
/// Timer record
///
/// `anchor` is the creation time or the logical time of the last firing. A
/// replica at position `k` of `replicas` fires `k × stagger` after the
/// primary, which is what lets a backup take over from a dead primary
/// without duplicating the primary's deliveries while it is alive.
///
/// `anchor` 是创建时间或上一次触发的逻辑时间。位于 `replicas` 第 `k` 个位置的
/// 副本比主副本晚 `k × stagger` 触发，使备份能在主副本失效时接管，
/// 而在主副本存活时不会重复投递。
#[derive(Debug, Clone)]
pub struct Timer {
    pub id: TimerId,
    pub interval: Duration,
    pub repeat_for: Duration,
    pub repeat_count: u32,
    pub sequence_number: u64,
    pub callback: Callback,
    pub replication_factor: u32,
    pub replicas: Vec<NodeId>,
    pub anchor: Instant,
    pub state: TimerState,
    pub tombstone: bool,
    pub audit: AuditTrail,
}

impl Timer {
    /// 从规格创建一个待定的定时器
    /// Create a pending timer from a spec
    pub fn new(id: TimerId, spec: TimerSpec, now: Instant, audit_capacity: usize) -> Self {
        let repeat_count = spec.repeat_count();
        Self {
            id,
            interval: spec.interval,
            repeat_for: spec.repeat_for,
            repeat_count,
            sequence_number: 0,
            callback: spec.callback,
            replication_factor: spec.replication_factor,
            replicas: Vec::new(),
            anchor: now,
            state: TimerState::Pending,
            tombstone: false,
            audit: AuditTrail::new(audit_capacity),
        }
    }

    /// Firings left in the budget.
    /// 剩余的触发次数。
    pub fn remaining(&self) -> u64 {
        (self.repeat_count as u64).saturating_sub(self.sequence_number)
    }

    pub fn is_live(&self) -> bool {
        !self.tombstone
    }

    pub fn replica_position(&self, node: &NodeId) -> Option<usize> {
        self.replicas.iter().position(|n| n == node)
    }

    /// Deadline of the next occurrence for a replica delayed by `offset`.
    /// 对于延迟 `offset` 的副本，下一次触发的截止时间。
    pub fn next_fire_at(&self, offset: Duration) -> Instant {
        self.anchor + self.interval + offset
    }

    /// Advances the timer by one firing and returns the sequence number the
    /// callback must carry. The anchor moves to the logical firing time
    /// (`now − offset`), so overdue occurrences are not replayed.
    ///
    /// 将定时器推进一次触发，并返回回调需要携带的序列号。
    pub fn record_firing(&mut self, now: Instant, offset: Duration) -> u64 {
        self.sequence_number += 1;
        self.anchor = now.checked_sub(offset).unwrap_or(now);
        if self.remaining() == 0 {
            self.become_tombstone();
        }
        self.sequence_number
    }

    pub fn become_tombstone(&mut self) {
        self.tombstone = true;
        self.state = TimerState::Terminal;
    }
}
