use crate::NodeAdvertisement;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("bootstrap fetch failed: {0}")]
    Fetch(String),
    #[error("no known nodes to choose from")]
    NoNodesAvailable,
    #[error("timed out waiting for the cluster index lock")]
    LockTimeout,
}

struct IndexState {
    nodes: Mutex<HashMap<String, NodeAdvertisement>>,
}

/// Process-wide set of known cache nodes, merged from bootstrap responses
/// and peer gossip across every `CacheClient` instance in this process.
///
/// A single `OnceLock` per address space is this crate's rendition of a
/// "named, process-wide" index: one index is shared by every client built
/// in the same process, matching the single-process scope a `OnceLock`
/// actually has.
pub struct ClusterIndex {
    state: &'static IndexState,
}

static INDEX: OnceLock<IndexState> = OnceLock::new();

const LOCK_WAIT_BUDGET: Duration = Duration::from_millis(500);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

impl ClusterIndex {
    /// Obtain the process-wide index, initializing it on first call.
    #[must_use]
    pub fn shared() -> Self {
        let state = INDEX.get_or_init(|| IndexState {
            nodes: Mutex::new(HashMap::new()),
        });
        Self { state }
    }

    /// Merge newly discovered nodes into the index, waiting up to 500ms
    /// for the lock before giving up. Two advertisements are the same node
    /// iff their `node_id` matches case-insensitively, so the map key is
    /// the lowercased `node_id`; the advertisement itself keeps its
    /// original casing.
    pub async fn merge(&self, discovered: Vec<NodeAdvertisement>) -> Result<(), DiscoveryError> {
        let mut guard = self.acquire().await?;
        for node in discovered {
            guard.insert(node.node_id.to_lowercase(), node);
        }
        Ok(())
    }

    /// Merge `discovered`, excluding any advertisement whose `node_id`
    /// matches `exclude_node_id` case-insensitively (used by a discovery
    /// pass to avoid a node gossiping itself back into its own index).
    pub async fn merge_excluding(
        &self,
        discovered: Vec<NodeAdvertisement>,
        exclude_node_id: &str,
    ) -> Result<(), DiscoveryError> {
        let exclude = exclude_node_id.to_lowercase();
        let filtered = discovered
            .into_iter()
            .filter(|n| n.node_id.to_lowercase() != exclude)
            .collect();
        self.merge(filtered).await
    }

    /// Remove a node from the index (the replication worker calls this on
    /// connection loss so the node becomes eligible for rediscovery).
    pub async fn remove(&self, node_id: &str) -> Result<(), DiscoveryError> {
        let mut guard = self.acquire().await?;
        guard.remove(&node_id.to_lowercase());
        Ok(())
    }

    /// Pick a random known node, waiting up to 500ms for the lock before
    /// giving up.
    pub async fn pick_random(&self) -> Result<NodeAdvertisement, DiscoveryError> {
        let guard = self.acquire().await?;
        let nodes: Vec<&NodeAdvertisement> = guard.values().collect();
        nodes
            .choose(&mut rand::thread_rng())
            .map(|n| (*n).clone())
            .ok_or(DiscoveryError::NoNodesAvailable)
    }

    pub async fn known_nodes(&self) -> Result<Vec<NodeAdvertisement>, DiscoveryError> {
        let guard = self.acquire().await?;
        Ok(guard.values().cloned().collect())
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, HashMap<String, NodeAdvertisement>>, DiscoveryError> {
        let deadline = tokio::time::Instant::now() + LOCK_WAIT_BUDGET;
        loop {
            if let Ok(guard) = self.state.nodes.try_lock() {
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DiscoveryError::LockTimeout);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    /// A freshly allocated index, independent of the process-wide
    /// singleton. Exists so tests that aren't specifically exercising
    /// singleton sharing don't trip over each other's state — `cargo test`
    /// runs `#[tokio::test]`s in the same process, and they'd otherwise all
    /// fight over the one `OnceLock`.
    #[cfg(test)]
    #[must_use]
    fn isolated() -> Self {
        let state = Box::leak(Box::new(IndexState {
            nodes: Mutex::new(HashMap::new()),
        }));
        Self { state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeAdvertisement {
        NodeAdvertisement {
            node_id: id.to_owned(),
            host: format!("{id}.cache.internal"),
            port: 9000,
        }
    }

    #[tokio::test]
    async fn merge_then_pick_random_returns_a_known_node() {
        let index = ClusterIndex::isolated();
        index.merge(vec![node("a"), node("b")]).await.unwrap();
        let picked = index.pick_random().await.unwrap();
        assert!(picked.node_id == "a" || picked.node_id == "b");
    }

    #[tokio::test]
    async fn merge_treats_node_id_as_case_insensitive() {
        let index = ClusterIndex::isolated();
        index.merge(vec![node("Case-Node")]).await.unwrap();
        index.merge(vec![node("case-node")]).await.unwrap();
        let nodes = index.known_nodes().await.unwrap();
        assert_eq!(nodes.iter().filter(|n| n.node_id.eq_ignore_ascii_case("case-node")).count(), 1);
    }

    #[tokio::test]
    async fn merge_excluding_drops_the_excluded_node_id() {
        let index = ClusterIndex::isolated();
        index.remove("self-node").await.unwrap();
        index
            .merge_excluding(vec![node("self-node"), node("peer-node")], "SELF-NODE")
            .await
            .unwrap();
        let nodes = index.known_nodes().await.unwrap();
        assert!(!nodes.iter().any(|n| n.node_id == "self-node"));
        assert!(nodes.iter().any(|n| n.node_id == "peer-node"));
    }

    /// Uses the real process-wide singleton (unlike the other tests here,
    /// which isolate their state) because sharing *is* the behavior under
    /// test.
    #[tokio::test]
    async fn pick_random_is_shared_across_index_handles_in_process() {
        let first = ClusterIndex::shared();
        first.merge(vec![node("shared-node")]).await.unwrap();

        let second = ClusterIndex::shared();
        let nodes = second.known_nodes().await.unwrap();
        assert!(nodes.iter().any(|n| n.node_id == "shared-node"));
    }
}
