//! 回调分发器
//! Callback Dispatcher
//!
//! 该模块实现了将触发转换为出站HTTP回调的 actor。投递在有界的工作者池中进行：
//! 队列容量有限，同时进行的投递数由信号量限制。每次投递按重试策略重试，
//! 结果（成功或耗尽重试）通过结果通道报告给节点。
//!
//! This module implements the actor that turns firings into outbound HTTP
//! callbacks. Deliveries run on a bounded worker pool: the queue has a fixed
//! capacity and a semaphore bounds how many deliveries are in flight. Each
//! delivery is retried according to the retry policy, and its outcome
//! (delivered or exhausted) is reported to the node on the outcome channel.

mod transport;


pub use transport::{CallbackTransport, HttpCallbackTransport, SEQUENCE_HEADER};

use crate::config::CallbackConfig;
use crate::error::Error;
use crate::scheduler::FiringSink;
use crate::store::Firing;
use crate::timer::TimerId;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// 一次投递的最终结果
/// Final result of one delivery
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered {
        firing: Firing,
        attempts: u32,
    },
    Failed {
        firing: Firing,
        attempts: u32,
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn firing(&self) -> &Firing {
        match self {
            DeliveryOutcome::Delivered { firing, .. } | DeliveryOutcome::Failed { firing, .. } => firing,
        }
    }
}

/// 分发器统计信息
/// Dispatcher statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DispatcherStats {
    /// 正在进行的投递数
    /// Deliveries in flight
    pub in_flight: usize,
    /// 等待工作者或等待同一定时器前一次投递的触发数
    /// Firings waiting for a worker or for the previous delivery of their timer
    pub queued: usize,
    /// 成功投递总数
    /// Deliveries that succeeded
    pub delivered_total: u64,
    /// 重试耗尽的投递总数
    /// Deliveries that exhausted their retries
    pub failed_total: u64,
    /// 因队列已满被拒绝的触发总数
    /// Firings rejected because the queue was full
    pub rejected_total: u64,
    /// HTTP尝试总数
    /// HTTP attempts made
    pub attempts_total: u64,
}

#[derive(Debug)]
enum DispatcherCommand {
    GetStats {
        response_tx: oneshot::Sender<DispatcherStats>,
    },
    Shutdown,
}

/// Sent by a delivery task when it finishes.
#[derive(Debug)]
struct Done {
    id: TimerId,
    attempts: u32,
    delivered: bool,
}

/// 回调分发器 actor
/// Callback dispatcher actor
///
/// Deliveries of one timer never overlap: a firing whose timer still has a
/// delivery in flight waits behind it, so callbacks of a timer leave in
/// sequence order. Firings of different timers only compete for workers.
pub struct CallbackDispatcher<T: CallbackTransport> {
    transport: Arc<T>,
    config: CallbackConfig,
    workers: Arc<Semaphore>,
    command_rx: mpsc::Receiver<DispatcherCommand>,
    firing_rx: mpsc::Receiver<Firing>,
    /// Firings whose timer is idle, in arrival order.
    ready: VecDeque<Firing>,
    /// Timers with a firing ready or in flight, and the firings queued behind it.
    busy: HashMap<TimerId, VecDeque<Firing>>,
    done_tx: mpsc::UnboundedSender<Done>,
    done_rx: mpsc::UnboundedReceiver<Done>,
    outcome_tx: mpsc::Sender<DeliveryOutcome>,
    rejected: Arc<AtomicU64>,
    stats: DispatcherStats,
}

impl<T: CallbackTransport> CallbackDispatcher<T> {
    /// 运行分发器主循环
    /// Run the dispatcher main loop
    pub async fn run(mut self) {
        info!(workers = self.config.workers, "Callback dispatcher started");

        loop {
            let has_room = self.queued() < self.config.queue_capacity;
            let has_ready = !self.ready.is_empty();
            let workers = self.workers.clone();

            tokio::select! {
                biased;

                Some(done) = self.done_rx.recv() => self.finish(done),

                command = self.command_rx.recv() => {
                    match command {
                        Some(DispatcherCommand::GetStats { response_tx }) => {
                            let _ = response_tx.send(self.snapshot());
                        }
                        Some(DispatcherCommand::Shutdown) | None => break,
                    }
                }

                Ok(permit) = workers.acquire_owned(), if has_ready => {
                    if let Some(firing) = self.ready.pop_front() {
                        self.deliver(firing, permit);
                    }
                }

                Some(firing) = self.firing_rx.recv(), if has_room => self.enqueue(firing),
            }
        }

        info!(
            delivered = self.stats.delivered_total,
            failed = self.stats.failed_total,
            dropped = self.queued(),
            "Callback dispatcher stopped"
        );
    }

    fn queued(&self) -> usize {
        self.ready.len() + self.busy.values().map(VecDeque::len).sum::<usize>()
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.queued(),
            rejected_total: self.rejected.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }

    /// Parks the firing behind the previous firing of its timer, if any.
    fn enqueue(&mut self, firing: Firing) {
        match self.busy.get_mut(&firing.id()) {
            Some(waiting) => {
                trace!(
                    timer_id = %firing.id(),
                    sequence_number = firing.sequence_number,
                    "Waiting for previous delivery"
                );
                waiting.push_back(firing);
            }
            None => {
                self.busy.insert(firing.id(), VecDeque::new());
                self.ready.push_back(firing);
            }
        }
    }

    /// Accounts a finished delivery and releases the next firing of its timer.
    fn finish(&mut self, done: Done) {
        self.stats.in_flight = self.stats.in_flight.saturating_sub(1);
        self.stats.attempts_total += done.attempts as u64;
        if done.delivered {
            self.stats.delivered_total += 1;
        } else {
            self.stats.failed_total += 1;
        }

        match self.busy.get_mut(&done.id).map(VecDeque::pop_front) {
            Some(Some(next)) => {
                // ahead of other timers: it has already waited one delivery
                self.ready.push_front(next);
            }
            _ => {
                self.busy.remove(&done.id);
            }
        }
    }

    /// Runs one delivery on its own task, holding `permit` until it ends.
    fn deliver(&mut self, firing: Firing, permit: OwnedSemaphorePermit) {
        let id = firing.id();
        self.stats.in_flight += 1;

        let transport = self.transport.clone();
        let retry = self.config.retry.clone();
        let attempt_timeout = self.config.attempt_timeout;
        let done_tx = self.done_tx.clone();
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let sequence_number = firing.sequence_number;
            let uri = firing.timer.callback.uri.clone();
            let body = firing.timer.callback.opaque.clone();

            let (result, attempts) = retry
                .run(attempt_timeout, None, || {
                    transport.post(&uri, sequence_number, body.clone())
                })
                .await;
            drop(permit);

            let outcome = match result {
                Ok(()) => {
                    trace!(timer_id = %id, sequence_number, attempts, "Callback delivered");
                    DeliveryOutcome::Delivered { firing, attempts }
                }
                Err(err) => {
                    warn!(
                        timer_id = %id,
                        sequence_number,
                        attempts,
                        uri = %uri,
                        error = %err,
                        "Callback failed after exhausting retries"
                    );
                    DeliveryOutcome::Failed {
                        firing,
                        attempts,
                        reason: err.to_string(),
                    }
                }
            };

            let _ = done_tx.send(Done {
                id,
                attempts,
                delivered: matches!(outcome, DeliveryOutcome::Delivered { .. }),
            });
            if outcome_tx.send(outcome).await.is_err() {
                debug!(timer_id = %id, "Outcome receiver dropped");
            }
        });
    }
}

/// 分发器句柄
/// Dispatcher handle
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<DispatcherCommand>,
    firing_tx: mpsc::Sender<Firing>,
    outcome_tx: mpsc::Sender<DeliveryOutcome>,
    rejected: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// 获取统计信息
    /// Get statistics
    pub async fn stats(&self) -> crate::error::Result<DispatcherStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(DispatcherCommand::GetStats { response_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// 关闭分发器。正在进行的投递会完成，排队的触发被丢弃。
    /// Shutdown the dispatcher. Deliveries in flight complete, queued firings are dropped.
    pub async fn shutdown(&self) -> crate::error::Result<()> {
        self.command_tx
            .send(DispatcherCommand::Shutdown)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

impl FiringSink for DispatcherHandle {
    /// Queues without blocking. A firing that finds the queue full is
    /// rejected and reported as a failed delivery with zero attempts.
    fn submit(&self, firing: Firing) {
        match self.firing_tx.try_send(firing) {
            Ok(()) => {}
            Err(TrySendError::Full(firing)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timer_id = %firing.id(),
                    sequence_number = firing.sequence_number,
                    "Callback queue full, firing rejected"
                );
                let outcome = DeliveryOutcome::Failed {
                    firing,
                    attempts: 0,
                    reason: "callback queue full".to_owned(),
                };
                if self.outcome_tx.try_send(outcome).is_err() {
                    debug!("Outcome channel full, rejection not audited");
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Callback dispatcher stopped, firing dropped");
            }
        }
    }
}

/// 启动回调分发器
/// Start the callback dispatcher
///
/// Returns the handle and the channel on which every delivery outcome is reported.
pub fn start_dispatcher<T: CallbackTransport>(
    transport: T,
    config: CallbackConfig,
) -> (DispatcherHandle, mpsc::Receiver<DeliveryOutcome>) {
    let (command_tx, command_rx) = mpsc::channel(8);
    let (firing_tx, firing_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (outcome_tx, outcome_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let rejected = Arc::new(AtomicU64::new(0));

    let handle = DispatcherHandle {
        command_tx,
        firing_tx,
        outcome_tx: outcome_tx.clone(),
        rejected: rejected.clone(),
    };

    let dispatcher = CallbackDispatcher {
        transport: Arc::new(transport),
        workers: Arc::new(Semaphore::new(config.workers.max(1))),
        config,
        command_rx,
        firing_rx,
        ready: VecDeque::new(),
        busy: HashMap::new(),
        done_tx,
        done_rx,
        outcome_tx,
        rejected,
        stats: DispatcherStats::default(),
    };
    tokio::spawn(dispatcher.run());

    (handle, outcome_rx)
}
