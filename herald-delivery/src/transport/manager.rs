use std::{fmt, sync::Arc};

use herald_common::internal;
use parking_lot::Mutex;

use super::{TransportBuilder, TransportHandle};
use crate::error::ConfigurationError;

/// Owner of the single transport handle.
///
/// The handle is built on the first successful [`acquire`](Self::acquire)
/// and reused until the manager is dropped. Construction runs under a mutex
/// so concurrent first callers build it exactly once. A failed build caches
/// nothing.
pub struct TransportManager {
    builder: Box<dyn TransportBuilder>,
    handle: Mutex<Option<TransportHandle>>,
}

impl TransportManager {
    /// Lazily build the handle with `builder` on first use.
    pub fn new(builder: impl TransportBuilder + 'static) -> Self {
        Self {
            builder: Box::new(builder),
            handle: Mutex::new(None),
        }
    }

    /// Use an already constructed handle, e.g. one built at startup.
    pub fn with_handle(handle: TransportHandle) -> Self {
        let fallback = Arc::clone(&handle);
        Self {
            builder: Box::new(move || Ok(Arc::clone(&fallback))),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Return the shared handle, building it if this is the first call.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the credentials are missing or
    /// malformed. Such errors are fatal and should not be retried.
    pub fn acquire(&self) -> Result<TransportHandle, ConfigurationError> {
        let mut guard = self.handle.lock();

        if let Some(handle) = guard.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let handle = self.builder.build()?;
        internal!(level = DEBUG, transport = ?handle, "Transport constructed");
        *guard = Some(Arc::clone(&handle));

        Ok(handle)
    }

    /// Returns `true` once a handle has been built or injected.
    pub fn is_initialised(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager")
            .field("initialised", &self.is_initialised())
            .finish_non_exhaustive()
    }
}
