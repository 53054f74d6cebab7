#![allow(dead_code, clippy::unwrap_used)] // Test utility module - not all helpers are used by every test binary

pub mod mock_server;
pub mod mock_transport;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use herald_delivery::{ConfigurationError, TransportHandle, TransportManager};
pub use mock_transport::{MockTransport, Step};

/// A manager that already holds `mock`.
pub fn manager_for(mock: &Arc<MockTransport>) -> Arc<TransportManager> {
    Arc::new(TransportManager::with_handle(
        Arc::clone(mock) as TransportHandle
    ))
}

/// A manager whose builder always fails, counting how often it was asked.
pub fn broken_manager(builds: Arc<AtomicUsize>) -> Arc<TransportManager> {
    Arc::new(TransportManager::new(move || {
        builds.fetch_add(1, Ordering::SeqCst);
        Err::<TransportHandle, _>(ConfigurationError::MalformedSecret {
            expected: 16,
            actual: 9,
        })
    }))
}
