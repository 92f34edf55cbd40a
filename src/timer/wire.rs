//! 客户端和对端之间交换的JSON文档
//! JSON documents exchanged with clients and peers
//!
//! Durations travel as whole milliseconds. Every inbound document rejects
//! unknown fields.
//!
//! 时长以整数毫秒传输。所有入站文档都拒绝未知字段。

use super::id::{NodeId, TimerId};
use super::model::{AuditEntry, Callback, Timer, TimerSpec, TimerState};
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// `callback` 块
/// The `callback` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackBlock {
    pub http: HttpCallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpCallback {
    pub uri: String,
    pub opaque: String,
}

impl CallbackBlock {
    fn from_callback(callback: &Callback) -> Self {
        Self {
            http: HttpCallback {
                uri: callback.uri.clone(),
                opaque: String::from_utf8_lossy(&callback.opaque).into_owned(),
            },
        }
    }

    fn into_callback(self) -> Result<Callback> {
        let url = reqwest::Url::parse(&self.http.uri)
            .map_err(|e| Error::InvalidSpec(format!("callback uri {:?}: {e}", self.http.uri)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidSpec(format!(
                "callback uri {:?} is not http(s)",
                self.http.uri
            )));
        }
        Ok(Callback {
            uri: self.http.uri,
            opaque: Bytes::from(self.http.opaque),
        })
    }
}

/// `POST /timers` 的请求体
/// Body of `POST /timers`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTimerRequest {
    pub timing: CreateTiming,
    pub callback: CallbackBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<CreateReliability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CreateTiming {
    pub interval: u64,
    /// Defaults to one interval, a single firing.
    /// 默认为一个间隔，即只触发一次。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_for: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CreateReliability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u32>,
}

impl CreateTimerRequest {
    /// Parses a request body. Any decoding failure is an `InvalidSpec`.
    /// 解析请求体。任何解码失败都视为 `InvalidSpec`。
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::InvalidSpec(e.to_string()))
    }

    /// Resolves defaults and validates the result.
    /// 填充默认值并校验结果。
    pub fn into_spec(self, default_factor: u32) -> Result<TimerSpec> {
        let interval = Duration::from_millis(self.timing.interval);
        let repeat_for = self
            .timing
            .repeat_for
            .map(Duration::from_millis)
            .unwrap_or(interval);
        let replication_factor = self
            .reliability
            .and_then(|r| r.replication_factor)
            .unwrap_or(default_factor);

        let spec = TimerSpec {
            interval,
            repeat_for,
            callback: self.callback.into_callback()?,
            replication_factor,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// `POST /timers` 的响应体
/// Response body of `POST /timers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTimer {
    pub id: TimerId,
}

/// 对端之间复制的完整定时器状态（`PUT /timers/{id}` 的请求体）
/// Full timer state replicated between peers (body of `PUT /timers/{id}`)
///
/// The anchor travels as `start-time-delta`, milliseconds relative to the
/// sender's clock at send time, so monotonic clocks never cross the wire.
///
/// 锚点以 `start-time-delta` 传输，即相对于发送方发送时刻的毫秒数，
/// 因此单调时钟不会跨节点传输。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaDocument {
    pub timing: ReplicaTiming,
    pub callback: CallbackBlock,
    pub reliability: ReplicaReliability,
    #[serde(default)]
    pub tombstone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ReplicaTiming {
    pub interval: u64,
    pub repeat_for: u64,
    pub sequence_number: u64,
    pub start_time_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ReplicaReliability {
    pub replication_factor: u32,
    pub replicas: Vec<NodeId>,
}

impl ReplicaDocument {
    pub fn from_timer(timer: &Timer, now: Instant) -> Self {
        let start_time_delta = if timer.anchor >= now {
            (timer.anchor - now).as_millis() as i64
        } else {
            -((now - timer.anchor).as_millis() as i64)
        };

        Self {
            timing: ReplicaTiming {
                interval: timer.interval.as_millis() as u64,
                repeat_for: timer.repeat_for.as_millis() as u64,
                sequence_number: timer.sequence_number,
                start_time_delta,
            },
            callback: CallbackBlock::from_callback(&timer.callback),
            reliability: ReplicaReliability {
                replication_factor: timer.replication_factor,
                replicas: timer.replicas.clone(),
            },
            tombstone: timer.tombstone,
        }
    }

    /// Rebuilds a timer record on the receiving node.
    /// 在接收节点上重建定时器记录。
    pub fn into_timer(self, id: TimerId, now: Instant, audit_capacity: usize) -> Result<Timer> {
        let interval = Duration::from_millis(self.timing.interval);
        let repeat_for = Duration::from_millis(self.timing.repeat_for);
        let spec = TimerSpec {
            interval,
            repeat_for,
            callback: self.callback.into_callback()?,
            replication_factor: self.reliability.replication_factor,
        };
        spec.validate()?;

        let delta = self.timing.start_time_delta;
        let offset = Duration::from_millis(delta.unsigned_abs());
        let anchor = if delta >= 0 {
            now + offset
        } else {
            now.checked_sub(offset).unwrap_or(now)
        };

        let mut timer = Timer::new(id, spec, now, audit_capacity);
        timer.sequence_number = self.timing.sequence_number;
        timer.replicas = self.reliability.replicas;
        timer.anchor = anchor;
        timer.state = TimerState::Scheduled;
        if self.tombstone || timer.remaining() == 0 {
            timer.become_tombstone();
        }
        Ok(timer)
    }
}

/// `PUT /timers/{id}` 的响应体
/// Response body of `PUT /timers/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertResponse {
    /// False when the stored copy was already as new or newer.
    /// 当存储的副本已经同样新或更新时为false。
    pub applied: bool,
}

/// `GET /timers?node-for-replicas=` 的响应体
/// Response body of `GET /timers?node-for-replicas=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaListing {
    pub timers: Vec<ReplicaEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaEntry {
    pub id: TimerId,
    pub document: ReplicaDocument,
}

/// `GET /timers/{id}` 的响应体
/// Response body of `GET /timers/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimerView {
    pub id: TimerId,
    pub interval: u64,
    pub repeat_for: u64,
    pub repeat_count: u32,
    pub remaining: u64,
    pub sequence_number: u64,
    pub state: TimerState,
    pub replication_factor: u32,
    pub replicas: Vec<NodeId>,
    pub callback: CallbackBlock,
    pub audit: Vec<AuditEntry>,
}

impl From<&Timer> for TimerView {
    fn from(timer: &Timer) -> Self {
        Self {
            id: timer.id,
            interval: timer.interval.as_millis() as u64,
            repeat_for: timer.repeat_for.as_millis() as u64,
            repeat_count: timer.repeat_count,
            remaining: timer.remaining(),
            sequence_number: timer.sequence_number,
            state: timer.state,
            replication_factor: timer.replication_factor,
            replicas: timer.replicas.clone(),
            callback: CallbackBlock::from_callback(&timer.callback),
            audit: timer.audit.iter().cloned().collect(),
        }
    }
}

