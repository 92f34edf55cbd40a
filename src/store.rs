//! 定时器存储
//! Timer Store
//!
//! 该模块实现了节点内存中的定时器集合，它是"有哪些定时器、何时触发"的唯一事实来源。
//! 记录表与按 `next_fire_at` 排序的索引通过唯一的 `reindex` 路径保持同步，
//! 因此调度器只需查看索引的第一个元素即可知道下一个截止时间。
//!
//! This module implements the node's in-memory timer collection, the single
//! source of truth for which timers exist and when they fire next. The record
//! map and the index ordered by `next_fire_at` are kept in sync through a
//! single `reindex` path, so the scheduler only has to look at the first
//! index entry to know the next deadline.
//!
//! The store is synchronous and exclusively owned by the scheduler actor,
//! which serializes every mutation.

mod stats;


pub use stats::StoreStats;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::timer::{AuditEntry, NodeId, Timer, TimerId, TimerIdGenerator, TimerSpec, TimerState};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// 一次触发：定时器推进后的快照和回调需要携带的序列号
/// One firing: the timer's post-firing snapshot and the sequence number the
/// callback must carry
#[derive(Debug, Clone)]
pub struct Firing {
    pub sequence_number: u64,
    pub timer: Timer,
}

impl Firing {
    pub fn id(&self) -> TimerId {
        self.timer.id
    }
}

/// 副本写入的结果
/// Result of applying a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No copy existed; the replica was stored.
    Inserted,
    /// The replica was newer and replaced the stored copy.
    Replaced,
    /// The stored copy is identical in sequence number.
    Unchanged,
    /// The stored copy is newer; the replica was ignored.
    Stale,
}

impl UpsertOutcome {
    pub fn applied(self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Replaced)
    }
}

/// 定时器存储
/// Timer store
#[derive(Debug)]
pub struct TimerStore {
    local: NodeId,
    stagger: Duration,
    tombstone_ttl: Duration,
    audit_capacity: usize,
    ids: TimerIdGenerator,
    timers: HashMap<TimerId, Timer>,
    /// Ordered by deadline: the next firing for live timers, the collection
    /// time for tombstones. Pending timers are never indexed.
    /// 按截止时间排序：活跃定时器为下一次触发时间，墓碑为回收时间。待定定时器不入索引。
    index: BTreeSet<(Instant, TimerId)>,
    /// Key currently held in `index` for each timer.
    deadlines: HashMap<TimerId, Instant>,
    stats: StoreStats,
}

impl TimerStore {
    /// 创建新的存储
    /// Create a new store
    ///
    /// `local` decides the replica position, and therefore the stagger, of
    /// every timer held here.
    pub fn new(local: NodeId, instance_id: u8, stagger: Duration, config: &SchedulerConfig) -> Self {
        Self {
            local,
            stagger,
            tombstone_ttl: config.tombstone_ttl,
            audit_capacity: config.audit_capacity,
            ids: TimerIdGenerator::new(instance_id),
            timers: HashMap::new(),
            index: BTreeSet::new(),
            deadlines: HashMap::new(),
            stats: StoreStats::default(),
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn audit_capacity(&self) -> usize {
        self.audit_capacity
    }

    /// Creates a pending record. It does not fire until [`activate`](Self::activate).
    ///
    /// 创建一条待定记录。在 [`activate`](Self::activate) 之前不会触发。
    pub fn create(&mut self, spec: TimerSpec, now: Instant) -> Result<&Timer> {
        spec.validate()?;

        let mut id = self.ids.next_id();
        while self.timers.contains_key(&id) {
            id = self.ids.next_id();
        }

        let timer = Timer::new(id, spec, now, self.audit_capacity);
        self.stats.created_total += 1;
        trace!(timer_id = %id, "Created pending timer");
        Ok(self.timers.entry(id).or_insert(timer))
    }

    /// Sets the replica set of a pending record and schedules it.
    ///
    /// 设置待定记录的副本集并开始调度。
    pub fn activate(&mut self, id: TimerId, replicas: Vec<NodeId>, now: Instant) -> Result<()> {
        let timer = self
            .timers
            .get_mut(&id)
            .filter(|t| t.state == TimerState::Pending)
            .ok_or(Error::NotFound(id))?;
        timer.replicas = replicas;
        timer.state = TimerState::Scheduled;
        self.reindex(id, now);
        Ok(())
    }

    /// Removes a pending record whose creation failed. Live records are left alone.
    ///
    /// 移除创建失败的待定记录。
    pub fn discard(&mut self, id: TimerId) -> bool {
        match self.timers.get(&id) {
            Some(timer) if timer.state == TimerState::Pending => {
                self.timers.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Looks up a scheduled timer. Pending records and tombstones are invisible.
    ///
    /// 查找已调度的定时器。待定记录和墓碑不可见。
    pub fn get(&self, id: TimerId) -> Result<&Timer> {
        self.timers
            .get(&id)
            .filter(|t| t.state == TimerState::Scheduled && t.is_live())
            .ok_or(Error::NotFound(id))
    }

    /// Applies `mutator` to a scheduled timer and re-indexes it from the
    /// mutated state in the same step.
    ///
    /// 对已调度的定时器应用 `mutator`，并在同一步中根据变更后的状态重建索引。
    pub fn update<R>(
        &mut self,
        id: TimerId,
        now: Instant,
        mutator: impl FnOnce(&mut Timer) -> R,
    ) -> Result<R> {
        let timer = self
            .timers
            .get_mut(&id)
            .filter(|t| t.state == TimerState::Scheduled && t.is_live())
            .ok_or(Error::NotFound(id))?;
        let result = mutator(timer);
        self.reindex(id, now);
        Ok(result)
    }

    /// Turns a scheduled timer into a tombstone and returns it for replication.
    /// In-flight deliveries finish; nothing fires afterwards.
    ///
    /// 将已调度的定时器变为墓碑并返回以便复制。
    pub fn delete(&mut self, id: TimerId, now: Instant) -> Result<Timer> {
        let snapshot = self.update(id, now, |timer| {
            timer.become_tombstone();
            timer.clone()
        })?;
        debug!(timer_id = %id, sequence_number = snapshot.sequence_number, "Timer deleted");
        Ok(snapshot)
    }

    /// Applies a copy received from a peer.
    ///
    /// Last writer wins on the sequence number, never on wall-clock time.
    /// Deletion wins over progress: a tombstone replaces a live copy whatever
    /// its sequence number, and a live copy never resurrects a tombstone.
    ///
    /// 应用从对端收到的副本。按序列号"最后写入者获胜"，从不按墙钟时间。
    /// 删除优先于进度：墓碑总会替换活跃副本，活跃副本永远不会复活墓碑。
    pub fn upsert_replica(&mut self, mut incoming: Timer, now: Instant) -> UpsertOutcome {
        let id = incoming.id;
        let outcome = match self.timers.get(&id) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.state == TimerState::Pending => UpsertOutcome::Stale,
            Some(existing) if !existing.is_live() => {
                if incoming.is_live() {
                    UpsertOutcome::Stale
                } else {
                    compare(incoming.sequence_number, existing.sequence_number)
                }
            }
            Some(existing) if !incoming.is_live() => {
                incoming.sequence_number = incoming.sequence_number.max(existing.sequence_number);
                UpsertOutcome::Replaced
            }
            Some(existing) => compare(incoming.sequence_number, existing.sequence_number),
        };

        if outcome.applied() {
            if let Some(existing) = self.timers.remove(&id) {
                incoming.audit = existing.audit;
            }
            trace!(
                timer_id = %id,
                sequence_number = incoming.sequence_number,
                tombstone = incoming.tombstone,
                ?outcome,
                "Applied replica"
            );
            self.timers.insert(id, incoming);
            self.reindex(id, now);
            self.stats.replicas_applied_total += 1;
        } else {
            self.stats.replicas_ignored_total += 1;
        }
        outcome
    }

    /// Pops every entry due at `now`.
    ///
    /// Live timers are advanced (sequence number +1, re-anchored) and
    /// re-indexed, or turned into tombstones when their budget runs out, in
    /// the same step. Due tombstones are purged. No entry can be observed as
    /// due twice.
    ///
    /// 弹出在 `now` 到期的所有条目。活跃定时器在同一步中被推进并重新索引，
    /// 或在预算耗尽时变为墓碑。到期的墓碑被清除。
    pub fn fire_due(&mut self, now: Instant) -> Vec<Firing> {
        let mut firings = Vec::new();

        while let Some(&(deadline, id)) = self.index.first() {
            if deadline > now {
                break;
            }
            self.index.remove(&(deadline, id));
            self.deadlines.remove(&id);

            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };

            if !timer.is_live() {
                self.timers.remove(&id);
                self.stats.purged_total += 1;
                trace!(timer_id = %id, "Purged tombstone");
                continue;
            }

            let offset = stagger_of(&self.local, self.stagger, timer);
            let sequence_number = timer.record_firing(now, offset);
            let snapshot = timer.clone();
            self.reindex(id, now);
            self.stats.fired_total += 1;

            trace!(
                timer_id = %id,
                sequence_number,
                remaining = snapshot.remaining(),
                late_ms = (now - deadline).as_millis() as u64,
                "Timer fired"
            );
            firings.push(Firing {
                sequence_number,
                timer: snapshot,
            });
        }

        if !firings.is_empty() {
            debug!(count = firings.len(), "Fired due timers");
        }
        firings
    }

    /// Earliest deadline in the index.
    /// 索引中最早的截止时间。
    pub fn next_deadline(&self) -> Option<Instant> {
        self.index.first().map(|&(deadline, _)| deadline)
    }

    /// Live timers whose replica set contains `node`, for resynchronisation.
    ///
    /// 副本集中包含 `node` 的活跃定时器，用于重新同步。
    pub fn timers_for_node(&self, node: &NodeId) -> Vec<Timer> {
        self.timers
            .values()
            .filter(|t| t.state == TimerState::Scheduled && t.is_live())
            .filter(|t| t.replicas.contains(node))
            .cloned()
            .collect()
    }

    /// Appends to a timer's audit trail. Tombstones still accept entries,
    /// since the last delivery of an exhausted timer may fail.
    ///
    /// 向定时器的审计记录追加条目。墓碑也接受条目。
    pub fn record_audit(&mut self, id: TimerId, entry: AuditEntry) -> Result<()> {
        let timer = self
            .timers
            .get_mut(&id)
            .filter(|t| t.state != TimerState::Pending)
            .ok_or(Error::NotFound(id))?;
        timer.audit.push(entry);
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = self.stats.clone();
        stats.live = 0;
        stats.pending = 0;
        stats.tombstones = 0;
        for timer in self.timers.values() {
            match (timer.state, timer.is_live()) {
                (TimerState::Pending, _) => stats.pending += 1,
                (_, true) => stats.live += 1,
                (_, false) => stats.tombstones += 1,
            }
        }
        stats.indexed = self.index.len();
        stats
    }

    /// Moves a timer's index entry to match its current state.
    fn reindex(&mut self, id: TimerId, now: Instant) {
        if let Some(old) = self.deadlines.remove(&id) {
            self.index.remove(&(old, id));
        }

        let Some(timer) = self.timers.get(&id) else {
            return;
        };
        let deadline = match timer.state {
            TimerState::Pending => return,
            TimerState::Scheduled if timer.is_live() => {
                timer.next_fire_at(stagger_of(&self.local, self.stagger, timer))
            }
            _ => now + self.tombstone_ttl,
        };

        self.index.insert((deadline, id));
        self.deadlines.insert(id, deadline);
    }
}

fn compare(incoming: u64, existing: u64) -> UpsertOutcome {
    match incoming.cmp(&existing) {
        Ordering::Greater => UpsertOutcome::Replaced,
        Ordering::Equal => UpsertOutcome::Unchanged,
        Ordering::Less => UpsertOutcome::Stale,
    }
}

/// Firing delay of the local copy: `stagger × position in the replica set`.
/// A copy that does not list this node is treated as the last replica.
fn stagger_of(local: &NodeId, stagger: Duration, timer: &Timer) -> Duration {
    let position = timer
        .replica_position(local)
        .unwrap_or(timer.replicas.len());
    stagger.saturating_mul(position as u32)
}
