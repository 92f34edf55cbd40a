//! 调度器测试
//! Scheduler tests

use super::*;
use crate::config::SchedulerConfig;
use crate::error::Error;
use crate::timer::{AuditEntry, Callback, NodeId, TimerId, TimerSpec};
use bytes::Bytes;
use std::time::Duration;

impl FiringSink for mpsc::UnboundedSender<Firing> {
    fn submit(&self, firing: Firing) {
        let _ = self.send(firing);
    }
}

fn local() -> NodeId {
    NodeId::from("127.0.0.1:7253")
}

fn spec(interval_ms: u64, repeat_for_ms: u64) -> TimerSpec {
    TimerSpec {
        interval: Duration::from_millis(interval_ms),
        repeat_for: Duration::from_millis(repeat_for_ms),
        callback: Callback {
            uri: "http://127.0.0.1:9/cb".into(),
            opaque: Bytes::from_static(b"Hello World!"),
        },
        replication_factor: 1,
    }
}

fn start() -> (SchedulerHandle, mpsc::UnboundedReceiver<Firing>) {
    let (firing_tx, firing_rx) = mpsc::unbounded_channel();
    let store = TimerStore::new(local(), 0, Duration::from_secs(2), &SchedulerConfig::default());
    (start_scheduler(store, firing_tx, 16), firing_rx)
}

async fn create_active(handle: &SchedulerHandle, spec: TimerSpec) -> TimerId {
    let timer = handle.create(spec).await.unwrap();
    handle.activate(timer.id, vec![local()]).await.unwrap();
    timer.id
}

#[tokio::test(start_paused = true)]
async fn test_repeating_timer_fires_every_interval() {
    let (handle, mut firings) = start();
    let start = Instant::now();
    let id = create_active(&handle, spec(1000, 5000)).await;

    let mut fired_at = Vec::new();
    for expected in 1..=5 {
        let firing = firings.recv().await.unwrap();
        assert_eq!(firing.id(), id);
        assert_eq!(firing.sequence_number, expected);
        assert_eq!(&firing.timer.callback.opaque[..], b"Hello World!");
        fired_at.push(Instant::now() - start);
    }

    let expected: Vec<Duration> = (1..=5).map(Duration::from_secs).collect();
    assert_eq!(fired_at, expected);

    // exhausted: nothing else fires
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(firings.try_recv().is_err());
    assert!(matches!(handle.get(id).await, Err(Error::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_pending_timer_waits_for_activation() {
    let (handle, mut firings) = start();
    let timer = handle.create(spec(100, 100)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(firings.try_recv().is_err());
    assert!(matches!(handle.get(timer.id).await, Err(Error::NotFound(_))));

    assert!(handle.discard(timer.id).await.unwrap());
    assert!(handle.activate(timer.id, vec![local()]).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_earlier_timer_shortens_the_sleep() {
    let (handle, mut firings) = start();
    let start = Instant::now();
    let slow = create_active(&handle, spec(10_000, 10_000)).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    let fast = create_active(&handle, spec(500, 500)).await;

    let first = firings.recv().await.unwrap();
    assert_eq!(first.id(), fast);
    assert_eq!(Instant::now() - start, Duration::from_millis(1500));

    let second = firings.recv().await.unwrap();
    assert_eq!(second.id(), slow);
    assert_eq!(Instant::now() - start, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_delete_prevents_further_firings() {
    let (handle, mut firings) = start();
    let id = create_active(&handle, spec(1000, 10_000)).await;

    assert_eq!(firings.recv().await.unwrap().sequence_number, 1);
    let tombstone = handle.delete(id).await.unwrap();
    assert!(tombstone.tombstone);
    assert_eq!(tombstone.sequence_number, 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(firings.try_recv().is_err());
    assert!(matches!(handle.delete(id).await, Err(Error::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_upsert_applies_newer_replica_once() {
    let (handle, _firings) = start();
    let id = create_active(&handle, spec(1000, 10_000)).await;

    let timer = handle.get(id).await.unwrap();
    let mut document = ReplicaDocument::from_timer(&timer, Instant::now());
    document.timing.sequence_number = 4;

    assert!(handle.upsert(id, document.clone()).await.unwrap().applied());
    assert!(!handle.upsert(id, document).await.unwrap().applied());
    assert_eq!(handle.get(id).await.unwrap().remaining(), 6);

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.store.replicas_applied_total, 1);
    assert_eq!(stats.store.replicas_ignored_total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_replica_is_rejected() {
    let (handle, _firings) = start();
    let id = create_active(&handle, spec(1000, 10_000)).await;

    let timer = handle.get(id).await.unwrap();
    let mut document = ReplicaDocument::from_timer(&timer, Instant::now());
    document.timing.interval = 0;
    assert!(matches!(
        handle.upsert(id, document).await,
        Err(Error::InvalidSpec(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timers_for_node_and_audit() {
    let (handle, _firings) = start();
    let id = create_active(&handle, spec(1000, 10_000)).await;

    handle
        .record_audit(id, AuditEntry::UnderReplicated { live: 1, wanted: 2 })
        .await
        .unwrap();
    assert_eq!(handle.get(id).await.unwrap().audit.len(), 1);

    let listed = handle.timers_for_node(local()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert!(
        handle
            .timers_for_node(NodeId::from("10.9.9.9:1"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test(start_paused = true)]
async fn test_stats_and_shutdown() {
    let (handle, _firings) = start();
    create_active(&handle, spec(1000, 10_000)).await;

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.store.live, 1);
    assert_eq!(stats.next_deadline_in_ms, Some(1000));
    assert!(stats.commands_processed >= 2);

    handle.shutdown().await.unwrap();
    tokio::task::yield_now().await;
    assert!(matches!(handle.stats().await, Err(Error::ChannelClosed)));
}
