#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the replicated timer service library.
//! 复制定时器服务库的根。

pub mod config;
pub mod error;
pub mod retry;
pub mod timer;

pub mod callback;
pub mod replication;
pub mod scheduler;
pub mod store;

pub mod api;
pub mod node;
pub mod server;
