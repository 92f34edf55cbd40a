//! 调度器 / 触发循环
//! Scheduler / Firing Loop
//!
//! 每个节点只有一个调度器 actor，它独占定时器存储，按顺序处理命令，
//! 并精确地睡眠到最早的截止时间（从不轮询）。任何命令都会唤醒循环，
//! 因此新插入的更早定时器会缩短当前的睡眠。
//!
//! One scheduler actor per node. It exclusively owns the timer store,
//! processes commands one at a time and sleeps exactly until the earliest
//! deadline (never polling). Any command wakes the loop, so a newly inserted
//! earlier timer shortens the current sleep.
//!
//! Firings are handed to a [`FiringSink`] without waiting on delivery, so a
//! slow callback endpoint never stalls unrelated timers.

mod command;
mod handle;

#[cfg(test)]
mod tests;

pub use command::{SchedulerCommand, SchedulerStats};
pub use handle::SchedulerHandle;

use crate::store::{Firing, TimerStore};
use crate::timer::{ReplicaDocument, ReplicaEntry};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

/// 接收触发的下游，通常是回调分发器
/// Downstream receiver of firings, normally the callback dispatcher
///
/// `submit` must not block the scheduler loop.
pub trait FiringSink: Send + 'static {
    fn submit(&self, firing: Firing);
}

/// 调度器 actor
/// Scheduler actor
pub struct TimerScheduler<S: FiringSink> {
    store: TimerStore,
    sink: S,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    commands_processed: u64,
    wakeups: u64,
}

impl<S: FiringSink> TimerScheduler<S> {
    /// 创建新的调度器及其命令发送端
    /// Create a new scheduler and the sender of its commands
    pub fn new(store: TimerStore, sink: S, command_buffer: usize) -> (Self, mpsc::Sender<SchedulerCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let scheduler = Self {
            store,
            sink,
            command_rx,
            commands_processed: 0,
            wakeups: 0,
        };
        (scheduler, command_tx)
    }

    /// 运行调度器主循环
    /// Run the scheduler main loop
    pub async fn run(mut self) {
        info!(node = %self.store.local(), "Scheduler started");

        loop {
            let deadline = self.store.next_deadline();

            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(SchedulerCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due();
                }
            }
        }

        info!(node = %self.store.local(), stats = %self.store.stats(), "Scheduler stopped");
    }

    fn fire_due(&mut self) {
        self.wakeups += 1;
        for firing in self.store.fire_due(Instant::now()) {
            self.sink.submit(firing);
        }
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        self.commands_processed += 1;
        let now = Instant::now();

        match command {
            SchedulerCommand::Create { spec, response_tx } => {
                let result = self.store.create(spec, now).cloned();
                respond(response_tx, result, "create");
            }

            SchedulerCommand::Activate {
                id,
                replicas,
                response_tx,
            } => {
                let result = self.store.activate(id, replicas, now);
                if result.is_ok() {
                    debug!(timer_id = %id, "Timer activated");
                }
                respond(response_tx, result, "activate");
            }

            SchedulerCommand::Discard { id, response_tx } => {
                let discarded = self.store.discard(id);
                if discarded {
                    debug!(timer_id = %id, "Pending timer discarded");
                }
                respond(response_tx, discarded, "discard");
            }

            SchedulerCommand::Get { id, response_tx } => {
                let result = self.store.get(id).cloned();
                respond(response_tx, result, "get");
            }

            SchedulerCommand::Delete { id, response_tx } => {
                let result = self.store.delete(id, now);
                respond(response_tx, result, "delete");
            }

            SchedulerCommand::Upsert {
                id,
                document,
                response_tx,
            } => {
                let result = document
                    .into_timer(id, now, self.store.audit_capacity())
                    .map(|timer| self.store.upsert_replica(timer, now));
                respond(response_tx, result, "upsert");
            }

            SchedulerCommand::RecordAudit { id, entry } => {
                if let Err(err) = self.store.record_audit(id, entry) {
                    trace!(timer_id = %id, error = %err, "Audit entry dropped");
                }
            }

            SchedulerCommand::TimersForNode { node, response_tx } => {
                let entries = self
                    .store
                    .timers_for_node(&node)
                    .iter()
                    .map(|timer| ReplicaEntry {
                        id: timer.id,
                        document: ReplicaDocument::from_timer(timer, now),
                    })
                    .collect();
                respond(response_tx, entries, "timers-for-node");
            }

            SchedulerCommand::GetStats { response_tx } => {
                let stats = SchedulerStats {
                    store: self.store.stats(),
                    commands_processed: self.commands_processed,
                    wakeups: self.wakeups,
                    next_deadline_in_ms: self
                        .store
                        .next_deadline()
                        .map(|d| d.saturating_duration_since(now).as_millis() as u64),
                };
                respond(response_tx, stats, "stats");
            }

            SchedulerCommand::Shutdown => {}
        }
    }
}

fn respond<T>(response_tx: tokio::sync::oneshot::Sender<T>, value: T, command: &'static str) {
    if response_tx.send(value).is_err() {
        warn!(command, "Requester went away before the response");
    }
}

/// 启动调度器
/// Start the scheduler
pub fn start_scheduler<S: FiringSink>(store: TimerStore, sink: S, command_buffer: usize) -> SchedulerHandle {
    let (scheduler, command_tx) = TimerScheduler::new(store, sink, command_buffer);
    tokio::spawn(scheduler.run());
    SchedulerHandle::new(command_tx)
}
