//! End-to-end scenario S5: a peer's `{status:"deleted", current:"k1"}`
//! change event, consumed by the replication worker, leaves the local
//! bucket for `k1` empty.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vncache::{CacheClientConfig, VncacheClient};
use vncache_discovery::NodeAdvertisement;
use vncache_test_support::{test_auth_manager, MockBootstrapServer, MockCacheNode};

fn test_config(bootstrap_url: &str) -> CacheClientConfig {
    CacheClientConfig {
        initial_nodes: vec![bootstrap_url.to_owned()],
        use_tls: false,
        initial_delay: Duration::from_millis(10),
        discovery_interval: Duration::from_secs(1),
        request_timeout: Duration::from_secs(5),
        ..CacheClientConfig::default()
    }
}

#[tokio::test]
async fn replicated_delete_event_clears_the_local_entry() {
    let node = MockCacheNode::start().await;
    node.seed("k1", b"v1");

    let bootstrap = MockBootstrapServer::start(vec![NodeAdvertisement {
        node_id: "node-replication-delete".to_owned(),
        host: "127.0.0.1".to_owned(),
        port: node.local_addr().port(),
    }])
    .await;

    let mut client = VncacheClient::start(test_config(&bootstrap.base_url()), test_auth_manager()).expect("valid config");
    let cancel = CancellationToken::new();

    // Read-through caches k1 locally.
    let fetched = client.get("k1", &cancel).await.expect("get k1").expect("k1 present on the mock node");
    assert_eq!(fetched, b"v1");
    assert!(client.local_contains("k1"), "k1 should be staged locally after a read-through get");

    // The replication worker's change listener is sharing the same node
    // connection and long-polling `Action=dq`; this event reaches it on
    // its next dequeue.
    node.push_deleted("k1");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !client.local_contains("k1") {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replicated delete for k1 did not reach the local cache in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    client.shutdown().await;
}
