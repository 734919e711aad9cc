//! Session state shared by every component

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// The top-level telemetry unit
///
/// Holds the initialization flag plus the lazily fetched backend session
/// and device identifiers. One per [`Instrumentation`](crate::Instrumentation).
#[derive(Debug, Default)]
pub struct Session {
    initialized: AtomicBool,
    session_id: RwLock<Option<String>>,
    device_id: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn cached_session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub(crate) fn cache_session_id(&self, id: &str) {
        *self.session_id.write() = Some(id.to_string());
    }

    pub(crate) fn clear_session_id(&self) {
        *self.session_id.write() = None;
    }

    pub(crate) fn cached_device_id(&self) -> Option<String> {
        self.device_id.read().clone()
    }

    pub(crate) fn cache_device_id(&self, id: &str) {
        *self.device_id.write() = Some(id.to_string());
    }

    #[cfg(test)]
    pub(crate) fn initialized() -> Self {
        let session = Self::new();
        session.mark_initialized();
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_cache() {
        let session = Session::new();
        assert!(!session.is_initialized());
        assert!(session.cached_session_id().is_none());

        session.mark_initialized();
        session.cache_session_id("s-1");
        session.cache_device_id("d-1");

        assert!(session.is_initialized());
        assert_eq!(session.cached_session_id().as_deref(), Some("s-1"));
        assert_eq!(session.cached_device_id().as_deref(), Some("d-1"));

        session.clear_session_id();
        assert!(session.cached_session_id().is_none());
        assert_eq!(session.cached_device_id().as_deref(), Some("d-1"));
    }
}
