//! Session property store
//!
//! Write-through mirror of the key/value properties attached to the
//! backend session. Transport failures are logged and swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::TelemetryBackend;
use crate::session::Session;

/// A named value attached to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProperty {
    pub key: String,
    pub value: String,
    /// Survives session end when set
    pub permanent: bool,
}

/// Key/value properties of the current session
pub struct SessionPropertyStore {
    backend: Arc<dyn TelemetryBackend>,
    session: Arc<Session>,
    entries: Mutex<HashMap<String, SessionProperty>>,
}

impl SessionPropertyStore {
    pub(crate) fn new(backend: Arc<dyn TelemetryBackend>, session: Arc<Session>) -> Self {
        Self {
            backend,
            session,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite a property. The later write's permanence wins.
    pub async fn set(&self, key: &str, value: &str, permanent: bool) {
        if !self.session.is_initialized() {
            return;
        }

        self.entries.lock().insert(
            key.to_string(),
            SessionProperty {
                key: key.to_string(),
                value: value.to_string(),
                permanent,
            },
        );

        if let Err(e) = self.backend.add_session_property(key, value, permanent).await {
            tracing::warn!(%key, error = %e, "Failed to set session property");
        }
    }

    /// Remove a property; absent keys are ignored
    pub async fn remove(&self, key: &str) {
        if !self.session.is_initialized() {
            return;
        }

        self.entries.lock().remove(key);

        if let Err(e) = self.backend.remove_session_property(key).await {
            tracing::warn!(%key, error = %e, "Failed to remove session property");
        }
    }

    /// Drop session-scoped entries after the backend session ends
    pub(crate) fn clear_session_scoped(&self) {
        self.entries.lock().retain(|_, p| p.permanent);
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &str) -> Option<SessionProperty> {
        self.entries.lock().get(key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn store(backend: &MemoryBackend, session: Session) -> SessionPropertyStore {
        SessionPropertyStore::new(Arc::new(backend.clone()), Arc::new(session))
    }

    #[tokio::test]
    async fn test_later_write_wins() {
        let backend = MemoryBackend::new();
        let store = store(&backend, Session::initialized());

        store.set("k", "v", true).await;
        store.set("k", "v2", false).await;

        let property = store.get("k").unwrap();
        assert_eq!(property.value, "v2");
        assert!(!property.permanent);

        let recorded = backend.property("k").unwrap();
        assert_eq!(recorded.value, "v2");
        assert!(!recorded.permanent);
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MemoryBackend::new();
        let store = store(&backend, Session::initialized());

        store.set("k", "v", false).await;
        store.remove("k").await;
        store.remove("never-set").await;

        assert!(store.get("k").is_none());
        assert!(backend.property("k").is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_noop_before_initialize() {
        let backend = MemoryBackend::new();
        let store = store(&backend, Session::new());

        store.set("k", "v", false).await;
        store.remove("k").await;

        assert_eq!(store.len(), 0);
        assert!(backend.properties().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_swallowed() {
        let backend = MemoryBackend::new();
        backend.set_fail_transport(true);
        let store = store(&backend, Session::initialized());

        store.set("k", "v", false).await;
        store.remove("other").await;

        assert!(backend.properties().is_empty());
        assert_eq!(store.get("k").map(|p| p.value), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_clear_session_scoped() {
        let backend = MemoryBackend::new();
        let store = store(&backend, Session::initialized());

        store.set("user_logged_in", "true", true).await;
        store.set("cart_item_count", "3", false).await;
        store.clear_session_scoped();

        assert!(store.get("user_logged_in").is_some());
        assert!(store.get("cart_item_count").is_none());
    }
}
