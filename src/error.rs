//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::timer::TimerId;
use thiserror::Error;

/// The primary error type for the timer service.
/// 定时器服务的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// The creation or replication body is malformed or semantically invalid
    /// (zero interval, replication factor below one, bad callback URI...).
    /// Never retried.
    ///
    /// 创建或复制请求体格式错误或语义无效。不会重试。
    #[error("invalid timer spec: {0}")]
    InvalidSpec(String),

    /// No live timer exists under this identifier.
    /// 该标识符下不存在活跃的定时器。
    #[error("timer {0} not found")]
    NotFound(TimerId),

    /// The creation-time quorum was not reached inside the replication window.
    /// The timer was not scheduled anywhere.
    ///
    /// 在复制窗口内未达到创建时的法定人数。定时器未在任何地方被调度。
    #[error("replication of timer {id} failed: {acked} of {required} required copies acknowledged")]
    ReplicationFailed {
        id: TimerId,
        acked: usize,
        required: usize,
    },

    /// Steady-state replication left fewer live copies than requested.
    /// 稳态复制后存活副本数少于请求的数量。
    #[error("timer {id} is under-replicated: {live} of {wanted} copies live")]
    UnderReplicated {
        id: TimerId,
        live: usize,
        wanted: usize,
    },

    /// The callback endpoint could not be reached after every retry.
    /// 所有重试之后回调端点仍不可达。
    #[error("callback for timer {id} (sequence {sequence_number}) failed after {attempts} attempts: {reason}")]
    CallbackFailed {
        id: TimerId,
        sequence_number: u64,
        attempts: u32,
        reason: String,
    },

    /// A peer or callback endpoint answered with a non-success status.
    /// 对端或回调端点返回了非成功状态码。
    #[error("{target} answered with status {status}")]
    Rejected { target: String, status: u16 },

    /// An outbound HTTP call failed at the transport level.
    /// 出站HTTP调用在传输层失败。
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON body could not be encoded or decoded.
    /// JSON主体无法编码或解码。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be loaded.
    /// 无法加载配置。
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation did not finish before its deadline.
    /// 操作未能在截止时间前完成。
    #[error("operation timed out")]
    Timeout,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("internal channel is broken")]
    ChannelClosed,
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
