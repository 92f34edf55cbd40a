//! 对端传输抽象
//! Peer transport abstraction

use crate::error::{Error, Result};
use crate::timer::{NodeId, ReplicaDocument, ReplicaEntry, ReplicaListing, TimerId, UpsertResponse};
use async_trait::async_trait;

/// 与对端节点通信的传输层
/// Transport used to talk to peer nodes
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Pushes a replica document. Returns whether the peer applied it; an
    /// acknowledged duplicate still counts as a held copy.
    ///
    /// 推送副本文档。返回对端是否应用了它；已确认的重复副本仍视为持有副本。
    async fn push(&self, peer: &NodeId, id: TimerId, document: &ReplicaDocument) -> Result<bool>;

    /// Asks `peer` for every timer whose replica set contains `node`.
    ///
    /// 向 `peer` 请求副本集中包含 `node` 的所有定时器。
    async fn fetch_for(&self, peer: &NodeId, node: &NodeId) -> Result<Vec<ReplicaEntry>>;
}

/// 基于共享 reqwest 连接池的HTTP对端传输
/// HTTP peer transport on a shared, pooled reqwest client
#[derive(Debug, Clone, Default)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
}

impl HttpPeerTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn push(&self, peer: &NodeId, id: TimerId, document: &ReplicaDocument) -> Result<bool> {
        let url = format!("{}{}", peer.base_url(), id.path());
        let response = self.client.put(&url).json(document).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                target: peer.to_string(),
                status: status.as_u16(),
            });
        }
        let body: UpsertResponse = response.json().await?;
        Ok(body.applied)
    }

    async fn fetch_for(&self, peer: &NodeId, node: &NodeId) -> Result<Vec<ReplicaEntry>> {
        let url = format!("{}/timers", peer.base_url());
        let response = self
            .client
            .get(&url)
            .query(&[("node-for-replicas", node.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rejected {
                target: peer.to_string(),
                status: status.as_u16(),
            });
        }
        let listing: ReplicaListing = response.json().await?;
        Ok(listing.timers)
    }
}
