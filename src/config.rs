//! Embedder-constructed client configuration.
//!
//! `vncache` never parses a config file itself; `CacheClientConfig` is a
//! plain struct the embedding application builds, validated the way
//! `forwarder::config::ForwarderConfig` is — required/derived fields
//! checked up front via a `validate()` call, errors returned through a
//! small `thiserror` enum, even though the *source* of this config (an
//! in-memory struct vs. a TOML file) differs.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_object_size must be >= 16, got {0}")]
    MaxObjectSizeTooSmall(usize),
    #[error("discovery_interval_sec must be >= 1, got {0}")]
    DiscoveryIntervalTooShort(u64),
    #[error("initial_nodes must list at least one bootstrap URI")]
    NoInitialNodes,
    #[error("initial_nodes entry '{0}' is not an absolute http(s) URI")]
    InvalidBootstrapUri(String),
    #[error("buckets must be > 0")]
    ZeroBuckets,
    #[error("bucket_size must be > 0")]
    ZeroBucketSize,
}

/// Configuration recognized by a `CacheClient` and the workers built on
/// top of it.
#[derive(Debug, Clone)]
pub struct CacheClientConfig {
    /// Payload cap in bytes; must be >= 16.
    pub max_object_size: usize,
    /// Select TLS (`wss://`) for the wire connection.
    pub use_tls: bool,
    /// Discovery pass period; must be >= 1s.
    pub discovery_interval: Duration,
    /// Per-message timeout; `Duration::ZERO` disables the timeout.
    pub request_timeout: Duration,
    /// Bootstrap URIs, each absolute and http/https.
    pub initial_nodes: Vec<String>,
    /// Supervisor startup delay before the first discovery wait.
    pub initial_delay: Duration,
    /// Local table row count (`table_size`); must be > 0.
    pub buckets: usize,
    /// Entries per bucket; must be > 0.
    pub bucket_size: usize,
    /// Age at which a local entry becomes eligible for pruning.
    pub max_age: Duration,
    /// Local table prune period; `Duration::ZERO` disables the refresh loop.
    pub refresh_interval: Duration,
    /// Zero-fill newly reserved bucket-allocator capacity.
    pub zero_all: bool,
    /// Skip the remote tier entirely — the local table becomes the whole
    /// cache, and the replication worker is not started.
    pub memory_only: bool,
    /// Delay before the supervisor retries discovery when well-known
    /// peers are configured but none resolved on the last pass.
    pub wellknown_backoff: Duration,
    /// Delay the supervisor waits after picking no node before trying
    /// discovery again.
    pub no_node_delay: Duration,
    /// Upper bound on concurrently-connected replication peers.
    pub max_peer_connections: usize,
}

impl Default for CacheClientConfig {
    fn default() -> Self {
        Self {
            max_object_size: 16 * 1024,
            use_tls: true,
            discovery_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            initial_nodes: Vec::new(),
            initial_delay: Duration::from_secs(10),
            buckets: 64,
            bucket_size: 256,
            max_age: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(60),
            zero_all: false,
            memory_only: false,
            wellknown_backoff: Duration::from_secs(2),
            no_node_delay: Duration::from_secs(5),
            max_peer_connections: 8,
        }
    }
}

impl CacheClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_object_size < 16 {
            return Err(ConfigError::MaxObjectSizeTooSmall(self.max_object_size));
        }
        if self.discovery_interval < Duration::from_secs(1) {
            return Err(ConfigError::DiscoveryIntervalTooShort(self.discovery_interval.as_secs()));
        }
        if self.initial_nodes.is_empty() {
            return Err(ConfigError::NoInitialNodes);
        }
        for uri in &self.initial_nodes {
            let is_http = uri.starts_with("http://") || uri.starts_with("https://");
            if !is_http {
                return Err(ConfigError::InvalidBootstrapUri(uri.clone()));
            }
        }
        if self.buckets == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if self.bucket_size == 0 {
            return Err(ConfigError::ZeroBucketSize);
        }
        Ok(())
    }
}
