//! End-to-end scenarios S1 and S2 from the testable-properties list: an
//! upsert/get round trip through the default JSON codec, and a rename
//! observed atomically as either the old or the new key, never both.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vncache::{CacheClientConfig, VncacheClient};
use vncache_discovery::NodeAdvertisement;
use vncache_test_support::{test_auth_manager, MockBootstrapServer, MockCacheNode};

#[derive(serde::Serialize, serde::Deserialize, PartialEq, Eq, Debug)]
struct Session {
    uid: String,
    ttl: u32,
}

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
async fn upsert_get_and_rename_round_trip() {
    let node = MockCacheNode::start().await;
    let bootstrap = MockBootstrapServer::start(vec![NodeAdvertisement {
        node_id: "node-upsert-get-rename".to_owned(),
        host: "127.0.0.1".to_owned(),
        port: node.local_addr().port(),
    }])
    .await;

    let mut client = VncacheClient::start(test_config(&bootstrap.base_url()), test_auth_manager()).expect("valid config");
    let cancel = CancellationToken::new();

    // S1: upsert k="session-42", v={"uid":"u7","ttl":60} via default JSON;
    // get returns an equal object.
    let value = Session { uid: "u7".to_owned(), ttl: 60 };
    let body = serde_json::to_vec(&value).unwrap();
    client.add_or_update("session-42", None, &body, &cancel).await.expect("upsert session-42");

    let fetched = client
        .get("session-42", &cancel)
        .await
        .expect("get session-42")
        .expect("session-42 present after upsert");
    let decoded: Session = serde_json::from_slice(&fetched).unwrap();
    assert_eq!(decoded, value);

    // S2: upsert k="a", new="b", v=0x0102; get "b" -> 0x0102; get "a" -> None.
    client
        .add_or_update("a", Some("b"), &[0x01, 0x02], &cancel)
        .await
        .expect("upsert with rename");

    let at_b = client.get("b", &cancel).await.expect("get b");
    assert_eq!(at_b, Some(vec![0x01, 0x02]));

    let at_a = client.get("a", &cancel).await.expect("get a");
    assert_eq!(at_a, None);

    client.shutdown().await;
}
