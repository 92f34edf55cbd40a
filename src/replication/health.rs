//! 对端健康状态
//! Peer health

use crate::timer::NodeId;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    suspect: bool,
    consecutive_failures: u32,
}

/// 单个对端的健康快照
/// Health snapshot of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeerStatus {
    pub node: NodeId,
    pub suspect: bool,
    pub consecutive_failures: u32,
}

/// Tracks which peers failed to acknowledge their last push. A suspect peer
/// gets a single attempt per push instead of a retry window, so one dead
/// node cannot hold replication slots.
///
/// 记录哪些对端没有确认最近一次推送。可疑对端每次推送只尝试一次。
#[derive(Debug, Default)]
pub struct PeerHealth {
    peers: DashMap<NodeId, PeerState>,
}

impl PeerHealth {
    pub fn is_suspect(&self, node: &NodeId) -> bool {
        self.peers.get(node).is_some_and(|state| state.suspect)
    }

    pub fn record_success(&self, node: &NodeId) {
        let mut state = self.peers.entry(node.clone()).or_default();
        if state.suspect {
            info!(peer = %node, "Peer acknowledged again, no longer suspect");
        }
        *state = PeerState::default();
    }

    pub fn record_failure(&self, node: &NodeId) {
        let mut state = self.peers.entry(node.clone()).or_default();
        state.consecutive_failures += 1;
        if !state.suspect {
            state.suspect = true;
            warn!(peer = %node, "Peer did not acknowledge, marked suspect");
        }
    }

    /// 所有已知对端的快照，按节点排序
    /// Snapshot of every known peer, sorted by node
    pub fn snapshot(&self) -> Vec<PeerStatus> {
        let mut peers: Vec<PeerStatus> = self
            .peers
            .iter()
            .map(|entry| PeerStatus {
                node: entry.key().clone(),
                suspect: entry.suspect,
                consecutive_failures: entry.consecutive_failures,
            })
            .collect();
        peers.sort_by(|a, b| a.node.cmp(&b.node));
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_marks_suspect_until_success() {
        let health = PeerHealth::default();
        let peer = NodeId::from("10.0.0.2:7253");
        assert!(!health.is_suspect(&peer));

        health.record_failure(&peer);
        health.record_failure(&peer);
        assert!(health.is_suspect(&peer));
        assert_eq!(health.snapshot()[0].consecutive_failures, 2);

        health.record_success(&peer);
        assert!(!health.is_suspect(&peer));
        assert_eq!(
            health.snapshot(),
            vec![PeerStatus {
                node: peer,
                suspect: false,
                consecutive_failures: 0,
            }]
        );
    }
}
