//! Cluster node advertisement and discovery: bootstrap resolution, the
//! process-wide known-peer index, and random node selection.

mod index;

pub use index::{ClusterIndex, DiscoveryError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cache node as advertised by the bootstrap endpoint or gossiped by a
/// peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAdvertisement {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl NodeAdvertisement {
    #[must_use]
    pub fn endpoint(&self, use_tls: bool) -> String {
        let scheme = if use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/cache", self.host, self.port)
    }
}

/// Fetch the well-known bootstrap document (`/.well-known/vncache`) from a
/// seed host and return the nodes it advertises.
pub async fn fetch_bootstrap(
    client: &reqwest::Client,
    seed_base_url: &str,
    timeout: Duration,
) -> Result<Vec<NodeAdvertisement>, DiscoveryError> {
    let url = format!("{}/.well-known/vncache", seed_base_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| DiscoveryError::Fetch(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DiscoveryError::Fetch(format!(
            "bootstrap endpoint {url} returned {}",
            response.status()
        )));
    }
    response
        .json::<Vec<NodeAdvertisement>>()
        .await
        .map_err(|e| DiscoveryError::Fetch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_formats_ws_and_wss_by_tls_flag() {
        let node = NodeAdvertisement {
            node_id: "n1".to_owned(),
            host: "cache.internal".to_owned(),
            port: 9443,
        };
        assert_eq!(node.endpoint(false), "ws://cache.internal:9443/cache");
        assert_eq!(node.endpoint(true), "wss://cache.internal:9443/cache");
    }
}
