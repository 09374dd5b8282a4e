//! Distribution strategies: mapping a key hash to one node of a fixed set
//!
//! Two policies are provided. [`ModuloDistribution`] is the simple
//! `hash % node_count` placement; it reshuffles most keys whenever the node
//! set changes size, which is a documented limitation, not a bug. Callers
//! needing reshuffle-free placement should use [`HashRing`], a weighted
//! consistent-hashing ring.

use crate::core::error::{RedisError, RedisResult};
use crate::hashing::compute_hash;
use std::collections::BTreeMap;

/// Points placed on the ring per unit of node weight
const RING_POINTS_PER_WEIGHT: u32 = 40;

/// Maps a distribution hash to one node among a fixed set.
///
/// Nodes are identified by their address string (`host:port`); the topology
/// layer resolves addresses back to connections.
pub trait DistributionStrategy {
    /// Register a node with the given relative weight
    fn add_node(&mut self, node: String, weight: u32);

    /// Remove a node; unknown nodes are ignored
    fn remove_node(&mut self, node: &str);

    /// Resolve the node responsible for a hash
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::NoNodes`] when the node set is empty.
    fn node_for_hash(&self, hash: u64) -> RedisResult<&str>;

    /// Resolve the node responsible for a key (hash-tag aware)
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::NoNodes`] when the node set is empty.
    fn node_for_key(&self, key: &[u8]) -> RedisResult<&str> {
        self.node_for_hash(compute_hash(key))
    }
}

/// Modulo placement: `hash % node_count` over the insertion-ordered node
/// list. Weights are ignored. Adding or removing a node reassigns almost
/// every key.
#[derive(Debug, Default)]
pub struct ModuloDistribution {
    nodes: Vec<String>,
}

impl ModuloDistribution {
    /// Create an empty strategy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionStrategy for ModuloDistribution {
    fn add_node(&mut self, node: String, _weight: u32) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    fn remove_node(&mut self, node: &str) {
        self.nodes.retain(|n| n != node);
    }

    fn node_for_hash(&self, hash: u64) -> RedisResult<&str> {
        if self.nodes.is_empty() {
            return Err(RedisError::NoNodes);
        }
        let idx = (hash % self.nodes.len() as u64) as usize;
        Ok(&self.nodes[idx])
    }
}

/// Weighted consistent-hashing ring.
///
/// Each node contributes `weight * 40` virtual points, placed by hashing
/// `"<node>-<index>"` with the same CRC16 used for keys; a key is served by
/// the first point at or after its hash, wrapping around. Removing a node
/// only reassigns the keys that mapped to its points.
#[derive(Debug, Default)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    nodes: Vec<(String, u32)>,
}

impl HashRing {
    /// Create an empty ring
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild(&mut self) {
        self.points.clear();
        for (node, weight) in &self.nodes {
            let count = (*weight).max(1) * RING_POINTS_PER_WEIGHT;
            for i in 0..count {
                // Points live in the same 16-bit CRC space as key hashes
                let label = format!("{node}-{i}");
                let point = compute_hash(label.as_bytes());
                self.points.insert(point, node.clone());
            }
        }
    }
}

impl DistributionStrategy for HashRing {
    fn add_node(&mut self, node: String, weight: u32) {
        self.nodes.retain(|(n, _)| n != &node);
        self.nodes.push((node, weight));
        self.rebuild();
    }

    fn remove_node(&mut self, node: &str) {
        self.nodes.retain(|(n, _)| n != node);
        self.rebuild();
    }

    fn node_for_hash(&self, hash: u64) -> RedisResult<&str> {
        if self.points.is_empty() {
            return Err(RedisError::NoNodes);
        }
        let node = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, n)| n.as_str());
        node.ok_or(RedisError::NoNodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_empty_fails() {
        let strategy = ModuloDistribution::new();
        assert!(matches!(
            strategy.node_for_key(b"foo"),
            Err(RedisError::NoNodes)
        ));
    }

    #[test]
    fn test_modulo_single_node_takes_all() {
        let mut strategy = ModuloDistribution::new();
        strategy.add_node("h1:6379".to_string(), 1);
        for key in [&b"a"[..], b"b", b"c", b"{tag}x"] {
            assert_eq!(strategy.node_for_key(key).unwrap(), "h1:6379");
        }
    }

    #[test]
    fn test_modulo_is_deterministic() {
        let mut strategy = ModuloDistribution::new();
        strategy.add_node("h1:6379".to_string(), 1);
        strategy.add_node("h2:6379".to_string(), 1);
        let first = strategy.node_for_key(b"somekey").unwrap().to_string();
        for _ in 0..10 {
            assert_eq!(strategy.node_for_key(b"somekey").unwrap(), first);
        }
    }

    #[test]
    fn test_modulo_tagged_keys_colocate() {
        let mut strategy = ModuloDistribution::new();
        strategy.add_node("h1:6379".to_string(), 1);
        strategy.add_node("h2:6379".to_string(), 1);
        strategy.add_node("h3:6379".to_string(), 1);
        assert_eq!(
            strategy.node_for_key(b"{user}a").unwrap(),
            strategy.node_for_key(b"{user}b").unwrap()
        );
    }

    #[test]
    fn test_modulo_remove_node() {
        let mut strategy = ModuloDistribution::new();
        strategy.add_node("h1:6379".to_string(), 1);
        strategy.add_node("h2:6379".to_string(), 1);
        strategy.remove_node("h1:6379");
        assert_eq!(strategy.node_for_key(b"anything").unwrap(), "h2:6379");
    }

    #[test]
    fn test_ring_empty_fails() {
        let ring = HashRing::new();
        assert!(matches!(ring.node_for_key(b"foo"), Err(RedisError::NoNodes)));
    }

    #[test]
    fn test_ring_all_nodes_get_keys() {
        let mut ring = HashRing::new();
        ring.add_node("h1:6379".to_string(), 1);
        ring.add_node("h2:6379".to_string(), 1);
        let mut saw_h1 = false;
        let mut saw_h2 = false;
        for i in 0..200 {
            let key = format!("key-{i}");
            match ring.node_for_key(key.as_bytes()).unwrap() {
                "h1:6379" => saw_h1 = true,
                "h2:6379" => saw_h2 = true,
                other => panic!("unknown node: {other}"),
            }
        }
        assert!(saw_h1 && saw_h2);
    }

    #[test]
    fn test_ring_removal_keeps_survivor_assignments() {
        let mut ring = HashRing::new();
        ring.add_node("h1:6379".to_string(), 1);
        ring.add_node("h2:6379".to_string(), 1);

        let before: Vec<(String, String)> = (0..100)
            .map(|i| {
                let key = format!("key-{i}");
                let node = ring.node_for_key(key.as_bytes()).unwrap().to_string();
                (key, node)
            })
            .collect();

        ring.remove_node("h2:6379");

        // Keys that already lived on h1 must not move
        for (key, node) in before.iter().filter(|(_, n)| n == "h1:6379") {
            assert_eq!(ring.node_for_key(key.as_bytes()).unwrap(), node);
        }
    }

    #[test]
    fn test_ring_weight_skews_placement() {
        let mut ring = HashRing::new();
        ring.add_node("big:6379".to_string(), 8);
        ring.add_node("small:6379".to_string(), 1);
        let mut big = 0;
        for i in 0..500 {
            let key = format!("key-{i}");
            if ring.node_for_key(key.as_bytes()).unwrap() == "big:6379" {
                big += 1;
            }
        }
        assert!(big > 250, "weighted node got only {big}/500 keys");
    }
}
