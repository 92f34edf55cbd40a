//! 副本放置
//! Replica placement
//!
//! Rendezvous (highest-random-weight) hashing: every candidate node is scored
//! with `SHA-256(node ‖ id)` and the highest scores win. The same timer
//! always maps to the same nodes, and adding or removing a member only moves
//! the timers that member wins or loses.
//!
//! 会合（最高随机权重）哈希：每个候选节点的得分为 `SHA-256(node ‖ id)`，
//! 得分最高者入选。同一个定时器总是映射到相同的节点。

use crate::timer::{NodeId, TimerId};
use sha2::{Digest, Sha256};

fn score(node: &NodeId, id: TimerId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(node.as_str().as_bytes());
    hasher.update(id.as_u64().to_be_bytes());
    hasher.finalize().into()
}

/// Replica set for `id`: the creating node first, then up to `factor − 1`
/// of `candidates` ranked by rendezvous score.
///
/// 定时器的副本集：创建节点在首位，然后是按会合得分排序的至多 `factor − 1` 个候选节点。
pub fn place(local: &NodeId, candidates: &[NodeId], id: TimerId, factor: u32) -> Vec<NodeId> {
    let wanted = (factor.max(1) - 1) as usize;

    let mut ranked: Vec<([u8; 32], &NodeId)> = candidates
        .iter()
        .filter(|node| *node != local)
        .map(|node| (score(node, id), node))
        .collect();
    ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    ranked.dedup_by(|a, b| a.1 == b.1);

    std::iter::once(local.clone())
        .chain(ranked.into_iter().take(wanted).map(|(_, node)| node.clone()))
        .collect()
}
