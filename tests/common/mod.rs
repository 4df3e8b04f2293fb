// tests/common/mod.rs
//! Common test utilities for sync-layer integration tests.

use std::sync::Once;

pub mod mock_sdk;

pub use mock_sdk::MockCallSdk;

static TRACING: Once = Once::new();

/// Route handler-failure warnings into the test output, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
