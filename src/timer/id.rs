//! 定时器和节点标识
//! Timer and node identities

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// 定时器标识，以16位小写十六进制形式出现在资源路径中
/// Timer identifier, rendered as 16 lowercase hex digits in resource paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Resource path of this timer on any node.
    /// 该定时器在任意节点上的资源路径。
    pub fn path(self) -> String {
        format!("/timers/{self}")
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for TimerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidSpec(format!("malformed timer id {s:?}")));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::InvalidSpec(format!("malformed timer id {s:?}: {e}")))
    }
}

impl Serialize for TimerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 定时器ID生成器
/// Timer ID generator
///
/// Layout, high to low bits: 40 bits of wall-clock milliseconds, 8 bits of
/// instance id, 16 bits of a per-node counter. Two nodes with distinct
/// instance ids never collide; one node can mint 65536 ids per millisecond.
///
/// 布局（从高位到低位）：40位墙钟毫秒、8位实例ID、16位节点内计数器。
#[derive(Debug)]
pub struct TimerIdGenerator {
    instance_id: u8,
    counter: u16,
    last_millis: u64,
}

impl TimerIdGenerator {
    pub fn new(instance_id: u8) -> Self {
        Self {
            instance_id,
            counter: 0,
            last_millis: 0,
        }
    }

    /// 生成下一个ID
    /// Mint the next id
    pub fn next_id(&mut self) -> TimerId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
            & ((1 << 40) - 1);

        // Never go backwards: a clock step would otherwise reuse old ids.
        if millis > self.last_millis {
            self.last_millis = millis;
            self.counter = 0;
        } else if self.counter == u16::MAX {
            self.last_millis += 1;
            self.counter = 0;
        }

        let id = (self.last_millis << 24) | ((self.instance_id as u64) << 16) | self.counter as u64;
        self.counter = self.counter.wrapping_add(1);
        TimerId(id)
    }
}

/// 节点标识，即其他节点访问该节点所用的 `host:port`
/// Node identity, the `host:port` other nodes reach it at
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base URL of the node's HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
