//! End-to-end scenarios S3 and S4: a `get` whose reported checksum does
//! not match its body fails closed with `invalid-checksum`, and a `get`
//! of a key the node has never seen returns `None` without invoking any
//! client-side checksum verification at all.

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
async fn checksum_mismatch_and_not_found_statuses() {
    let node = MockCacheNode::start().await;
    // S3: server returns `ok` with ChecksumType=fnv1a,
    // ChecksumValue=AAAAAAAAAAAAAAAA, body=0xDEADBEEF; client raises
    // invalid-checksum.
    node.seed_with_bad_checksum("corrupt-entry", &[0xDE, 0xAD, 0xBE, 0xEF], "AAAAAAAAAAAAAAAA");

    let bootstrap = MockBootstrapServer::start(vec![NodeAdvertisement {
        node_id: "node-checksum-and-not-found".to_owned(),
        host: "127.0.0.1".to_owned(),
        port: node.local_addr().port(),
    }])
    .await;

    let mut client = VncacheClient::start(test_config(&bootstrap.base_url()), test_auth_manager()).expect("valid config");
    let cancel = CancellationToken::new();

    let err = client.get("corrupt-entry", &cancel).await.expect_err("checksum mismatch must surface as an error");
    assert!(matches!(err, vncache::CacheError::InvalidChecksum), "got {err:?}");

    // S4: get of a key the node has never seen -> Status=nf -> None.
    let missing = client.get("missing", &cancel).await.expect("get of a missing key is not an error");
    assert_eq!(missing, None);

    client.shutdown().await;
}
