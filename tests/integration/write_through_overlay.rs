//! Write-through invariant: an upsert that the remote node rejects must
//! never leave a local copy visible, even if a prior successful upsert had
//! already staged one. A read-through `get` that succeeds remotely stages
//! the object locally so a later read is servable without another round
//! trip.

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
async fn read_through_stages_locally_and_a_rejected_write_never_does() {
    let node = MockCacheNode::start().await;
    node.seed("k1", b"v1");
    node.reject_updates("k2");

    let bootstrap = MockBootstrapServer::start(vec![NodeAdvertisement {
        node_id: "node-write-through".to_owned(),
        host: "127.0.0.1".to_owned(),
        port: node.local_addr().port(),
    }])
    .await;

    let mut client = VncacheClient::start(test_config(&bootstrap.base_url()), test_auth_manager()).expect("valid config");
    let cancel = CancellationToken::new();

    // Read-through: a remote hit becomes visible locally.
    let fetched = client.get("k1", &cancel).await.expect("get k1").expect("k1 present on the mock node");
    assert_eq!(fetched, b"v1");
    assert!(client.local_contains("k1"), "a successful read-through get must stage the object locally");

    // A remote-rejected upsert must surface the error and never stage k2
    // locally.
    let err = client
        .add_or_update("k2", None, b"v2", &cancel)
        .await
        .expect_err("remote rejection must propagate as an error");
    assert!(matches!(err, vncache::CacheError::InvalidStatus(_)), "got {err:?}");
    assert!(!client.local_contains("k2"), "a rejected remote write must never leave a local copy");
    assert!(!node.contains("k2"), "the remote node must not have applied the rejected update either");

    // A prior successful local copy of a key must be dropped if a later
    // write to that same key is remote-rejected.
    node.seed("k3", b"before");
    let before = client.get("k3", &cancel).await.expect("get k3").expect("k3 present before the rejected write");
    assert_eq!(before, b"before");
    assert!(client.local_contains("k3"));

    node.reject_updates("k3");
    let err = client
        .add_or_update("k3", None, b"after", &cancel)
        .await
        .expect_err("remote rejection must propagate as an error");
    assert!(matches!(err, vncache::CacheError::InvalidStatus(_)), "got {err:?}");
    assert!(
        !client.local_contains("k3"),
        "a stale local copy must be dropped when a write to the same key is remote-rejected"
    );

    client.shutdown().await;
}
