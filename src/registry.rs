//! In-flight handler registry.
//!
//! Maps [`HandlerId`] to the [`Handler`] of a request that is currently being
//! dispatched. The dispatcher adds an entry before the process runs and removes it
//! when the dispatch ends; other components (a control API serving the spawned
//! process, for one) look handlers up by id in between.

use crate::handler::Handler;
use crate::ids::HandlerId;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static GLOBAL: Lazy<Arc<HandlerRegistry>> = Lazy::new(|| Arc::new(HandlerRegistry::new()));

/// Lifetime counters of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Successful `add` calls.
    pub registered: u64,
    /// `remove` calls that actually removed a handler.
    pub deregistered: u64,
}

/// Concurrency-safe store of in-flight handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<HandlerId, Arc<Handler>>,
    registered: AtomicU64,
    deregistered: AtomicU64,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> Arc<HandlerRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn add(&self, handler: Arc<Handler>) {
        let id = handler.id();
        self.handlers.insert(id, handler);
        self.registered.fetch_add(1, Ordering::Relaxed);
        debug!(handler_id = %id, in_flight = self.handlers.len(), "Handler registered");
    }

    /// Remove a handler. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &HandlerId) -> Option<Arc<Handler>> {
        let removed = self.handlers.remove(id).map(|(_, h)| h);
        if removed.is_some() {
            self.deregistered.fetch_add(1, Ordering::Relaxed);
            debug!(handler_id = %id, in_flight = self.handlers.len(), "Handler deregistered");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &HandlerId) -> Option<Arc<Handler>> {
        self.handlers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, id: &HandlerId) -> bool {
        self.handlers.contains_key(id)
    }

    /// Ids of every in-flight handler, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<HandlerId> {
        self.handlers.iter().map(|entry| *entry.key()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered: self.registered.load(Ordering::Relaxed),
            deregistered: self.deregistered.load(Ordering::Relaxed),
        }
    }
}
