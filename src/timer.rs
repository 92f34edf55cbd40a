//! 定时器数据模型
//! Timer Data Model
//!
//! 该模块定义了定时器服务的核心实体：定时器标识、节点标识、定时器记录、
//! 经过校验的创建规格，以及客户端和对端之间交换的JSON文档。
//!
//! This module defines the core entities of the timer service: timer and
//! node identities, the timer record, the validated creation spec, and the
//! JSON documents exchanged with clients and peers.

mod id;
mod model;
mod wire;


pub use id::{NodeId, TimerId, TimerIdGenerator};
pub use model::{
    AuditEntry, AuditTrail, Callback, Timer, TimerSpec, TimerState, repeat_count,
};
pub use wire::{
    CallbackBlock, CreateReliability, CreateTimerRequest, CreateTiming, CreatedTimer,
    HttpCallback, ReplicaDocument, ReplicaEntry, ReplicaListing, ReplicaReliability,
    ReplicaTiming, TimerView, UpsertResponse,
};
