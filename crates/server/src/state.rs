//! Application state.
//!
//! Shared across all handlers. The only cross-session mutable state is the
//! session registry; every mutation of it originates on the owning session's
//! loop, so a plain RwLock suffices.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use voice_order_config::Settings;
use voice_order_persistence::{CallStore, InMemoryStore, OrderStore};

use crate::session::SessionEvent;

/// Handle to a live session's event loop.
#[derive(Clone)]
pub struct SessionHandle {
    pub events: mpsc::Sender<SessionEvent>,
}

/// Insertion-ordered mapping from call id to live session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<IndexMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call_id: &str, handle: SessionHandle) {
        self.sessions.write().insert(call_id.to_string(), handle);
        tracing::debug!(call_id = %call_id, "session registered");
    }

    pub fn remove(&self, call_id: &str) {
        if self.sessions.write().shift_remove(call_id).is_some() {
            tracing::debug!(call_id = %call_id, "session deregistered");
        }
    }

    pub fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(call_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Fan a shutdown out to every live session, in call-arrival order.
    pub async fn shutdown_all(&self) {
        let handles: Vec<(String, SessionHandle)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        for (call_id, handle) in handles {
            if handle.events.send(SessionEvent::Shutdown).await.is_err() {
                tracing::debug!(call_id = %call_id, "session already gone at shutdown");
            }
        }
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub calls: Arc<dyn CallStore>,
    pub orders: Arc<dyn OrderStore>,
    pub registry: Arc<SessionRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        calls: Arc<dyn CallStore>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            settings,
            calls,
            orders,
            registry: Arc::new(SessionRegistry::new()),
            started_at: Instant::now(),
        }
    }

    /// State backed by the in-memory store, for development and tests.
    pub fn in_memory(settings: Settings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::new(Arc::new(settings), store.clone(), store)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
