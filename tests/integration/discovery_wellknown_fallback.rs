//! End-to-end scenario S6: when every configured well-known bootstrap
//! peer is unreachable, the supervisor retries at the short
//! `wellknown_backoff` cadence instead of waiting out the full
//! `discovery_interval`, and never reports a connection.

use std::time::Duration;
use vncache::{CacheClientConfig, VncacheClient};
use vncache_test_support::{test_auth_manager, MockBootstrapServer};

fn test_config(bootstrap_url: &str) -> CacheClientConfig {
    CacheClientConfig {
        initial_nodes: vec![bootstrap_url.to_owned()],
        use_tls: false,
        initial_delay: Duration::from_millis(10),
        // Deliberately long: if the supervisor fell back to this cadence
        // instead of `wellknown_backoff`, the request count below would
        // stay at 1 for the whole test.
        discovery_interval: Duration::from_secs(10),
        no_node_delay: Duration::from_secs(10),
        wellknown_backoff: Duration::from_millis(150),
        request_timeout: Duration::from_secs(1),
        ..CacheClientConfig::default()
    }
}

#[tokio::test]
async fn unreachable_wellknown_peer_retries_on_the_short_backoff() {
    let bootstrap = MockBootstrapServer::start(vec![]).await;
    bootstrap.set_unreachable(true);

    let client = VncacheClient::start(test_config(&bootstrap.base_url()), test_auth_manager()).expect("valid config");

    tokio::time::sleep(Duration::from_millis(550)).await;

    let requests = bootstrap.request_count();
    assert!(
        requests >= 3,
        "expected several retries at the short well-known backoff cadence, saw {requests}"
    );
    assert!(!*client.is_connected().borrow(), "client must never connect to an unreachable cluster");

    client.shutdown().await;
}
