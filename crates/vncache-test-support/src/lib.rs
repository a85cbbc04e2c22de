//! Test-only scaffolding for `vncache`'s integration suite: a mock cache
//! node speaking the real binary wire protocol, and a mock bootstrap HTTP
//! endpoint for discovery.

mod auth_fixture;
mod bootstrap;
mod mock_node;

pub use auth_fixture::test_auth_manager;
pub use bootstrap::MockBootstrapServer;
pub use mock_node::MockCacheNode;
