//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::sync::Arc;
use std::time::Duration;
use visionflow_rs::pipeline::SoftwareBackend;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Software backend with room for any test graph
pub fn software_backend() -> Arc<SoftwareBackend> {
    Arc::new(SoftwareBackend::new(256))
}
