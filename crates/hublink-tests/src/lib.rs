//! Integration test helpers for hublink end-to-end scenarios.
//!
//! [`harness::hub::MockHub`] is an in-process WebSocket hub that speaks the
//! envelope protocol, so the real `WsConnector` can be exercised without a
//! remote service.

pub mod harness;

use hublink_client::ClientConfig;

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("hublink_client=debug,hublink_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Client config pointed at `endpoint` with a short reconnect delay.
pub fn test_config(endpoint: &str) -> ClientConfig {
    ClientConfig {
        endpoint: endpoint.to_string(),
        reconnect_delay_ms: 50,
        ..ClientConfig::default()
    }
}
