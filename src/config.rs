//! 定义了节点、复制、回调和调度器的可配置参数。
//! Defines configurable parameters for the node, replication, callbacks and the scheduler.
//!
//! Every section has a `Default`, and the whole structure can be read from a
//! TOML file. Durations are written in milliseconds (`*-ms` keys) and
//! unknown keys are rejected.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::timer::NodeId;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// A structure containing all configurable parameters of a node.
///
/// 包含节点所有可配置参数的结构体。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Identity and listening address of this node.
    /// 本节点的身份和监听地址。
    pub node: NodeConfig,

    /// Cluster membership.
    /// 集群成员。
    pub cluster: ClusterConfig,

    /// Replication-related parameters.
    /// 复制相关参数。
    pub replication: ReplicationConfig,

    /// Callback delivery parameters.
    /// 回调投递参数。
    pub callback: CallbackConfig,

    /// Scheduler and store parameters.
    /// 调度器和存储参数。
    pub scheduler: SchedulerConfig,
}

/// Identity and listening address of this node.
///
/// 本节点的身份和监听地址。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct NodeConfig {
    /// Socket address the HTTP server binds to.
    /// HTTP服务器绑定的套接字地址。
    pub bind_address: SocketAddr,
    /// The `host:port` other nodes use to reach this one. This is also the
    /// node's identity inside replica sets.
    ///
    /// 其他节点访问本节点使用的 `host:port`，也是本节点在副本集中的身份。
    pub advertise: NodeId,
    /// Folded into every generated timer id so that two nodes creating
    /// timers in the same millisecond do not collide.
    ///
    /// 混入每个生成的定时器ID，避免两个节点在同一毫秒内产生冲突。
    pub instance_id: u8,
}

/// Cluster membership.
///
/// 集群成员。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Every node of the cluster. The local node may be listed or not.
    /// 集群中的所有节点。本地节点可以列出也可以不列出。
    pub nodes: Vec<NodeId>,
}

/// How many copies must acknowledge a creation before it is reported durable.
///
/// 创建被视为持久之前必须确认的副本数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuorumPolicy {
    /// Every requested copy.
    All,
    /// A strict majority of the requested copies.
    Majority,
    /// At least this many copies, never more than requested.
    AtLeast(usize),
}

impl QuorumPolicy {
    /// Number of copies (local one included) required for `requested` copies.
    pub fn required(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match *self {
            QuorumPolicy::All => requested,
            QuorumPolicy::Majority => requested / 2 + 1,
            QuorumPolicy::AtLeast(n) => n.clamp(1, requested),
        }
    }
}

/// Replication-related parameters.
///
/// 复制相关参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ReplicationConfig {
    /// Replication factor used when a creation request does not name one.
    /// 创建请求未指定时使用的复制因子。
    pub default_factor: u32,
    /// Acknowledgements required before a creation succeeds.
    /// 创建成功前需要的确认数。
    pub quorum: QuorumPolicy,
    /// Bound on a single replica push.
    /// 单次副本推送的时间上限。
    #[serde(rename = "ack-timeout-ms", deserialize_with = "millis::deserialize")]
    pub ack_timeout: Duration,
    /// Total time a creation may spend waiting for its quorum.
    /// 创建等待法定人数的总时间。
    #[serde(rename = "create-window-ms", deserialize_with = "millis::deserialize")]
    pub create_window: Duration,
    /// Total time a steady-state push may spend retrying one peer.
    /// 稳态推送对单个对端重试的总时间。
    #[serde(rename = "update-window-ms", deserialize_with = "millis::deserialize")]
    pub update_window: Duration,
    /// Extra delay per position in the replica list. Backups fire this much
    /// later than the replica ahead of them, so they only deliver when the
    /// replicas ahead failed to.
    ///
    /// 副本列表中每个位置的额外延迟。备份副本比前一个副本晚触发这么久，
    /// 因此只有在前面的副本失败时才会投递。
    #[serde(rename = "replica-stagger-ms", deserialize_with = "millis::deserialize")]
    pub replica_stagger: Duration,
    /// Maximum number of concurrent steady-state replication tasks.
    /// 稳态复制任务的最大并发数。
    pub max_concurrent: usize,
    /// Retry policy for replica pushes.
    /// 副本推送的重试策略。
    pub retry: RetryPolicy,
    /// Ask peers for our timers at startup.
    /// 启动时向对端请求属于本节点的定时器。
    pub resync_on_start: bool,
}

/// Callback delivery parameters.
///
/// 回调投递参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CallbackConfig {
    /// Retry policy for a single delivery.
    /// 单次投递的重试策略。
    pub retry: RetryPolicy,
    /// Bound on a single HTTP attempt.
    /// 单次HTTP尝试的时间上限。
    #[serde(rename = "attempt-timeout-ms", deserialize_with = "millis::deserialize")]
    pub attempt_timeout: Duration,
    /// Maximum number of deliveries in flight.
    /// 同时进行的投递的最大数量。
    pub workers: usize,
    /// Firings held while every worker is busy. Further firings are rejected.
    /// 所有工作者忙碌时排队的触发数量，超出的触发被拒绝。
    pub queue_capacity: usize,
}

/// Scheduler and store parameters.
///
/// 调度器和存储参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Capacity of the scheduler's command channel.
    /// 调度器命令通道的容量。
    pub command_buffer: usize,
    /// How long a deleted or exhausted timer is remembered.
    /// 已删除或耗尽的定时器被保留的时间。
    #[serde(rename = "tombstone-ttl-ms", deserialize_with = "millis::deserialize")]
    pub tombstone_ttl: Duration,
    /// Entries kept in each timer's audit trail.
    /// 每个定时器审计记录中保留的条目数。
    pub audit_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 7253)),
            advertise: NodeId::from("127.0.0.1:7253"),
            instance_id: 0,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            default_factor: 2,
            quorum: QuorumPolicy::All,
            ack_timeout: Duration::from_millis(500),
            create_window: Duration::from_secs(2),
            update_window: Duration::from_secs(1),
            replica_stagger: Duration::from_secs(2),
            max_concurrent: 64,
            retry: RetryPolicy::default(),
            resync_on_start: true,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(2),
            workers: 64,
            queue_capacity: 4096,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command_buffer: 1024,
            tombstone_ttl: Duration::from_secs(10),
            audit_capacity: 16,
        }
    }
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Config = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&document)
    }

    /// Rejects combinations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.replication.default_factor == 0 {
            return Err(Error::Config("replication.default-factor must be at least 1".into()));
        }
        if self.callback.workers == 0 {
            return Err(Error::Config("callback.workers must be at least 1".into()));
        }
        if self.callback.queue_capacity == 0 || self.scheduler.command_buffer == 0 {
            return Err(Error::Config("channel capacities must be at least 1".into()));
        }
        if self.replication.max_concurrent == 0 {
            return Err(Error::Config("replication.max-concurrent must be at least 1".into()));
        }
        Ok(())
    }

    /// The local node's identity.
    pub fn local_node(&self) -> &NodeId {
        &self.node.advertise
    }

    /// Every other member of the cluster, in configuration order, deduplicated.
    pub fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = Vec::with_capacity(self.cluster.nodes.len());
        for node in &self.cluster.nodes {
            if node != self.local_node() && !peers.contains(node) {
                peers.push(node.clone());
            }
        }
        peers
    }
}

/// Reads a `Duration` written as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
