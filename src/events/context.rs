//! Per-perform hook context
//!
//! The resilience hooks communicate across the fetch and perform boundaries
//! through a process-wide map keyed by `profileId/usecase`. Each entry owns
//! the failover router for that use case and at most one queued action that
//! the perform boundary consumes.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::failsafe::FailoverRouter;

/// Action queued by a fetch-boundary hook for the perform boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedAction {
    /// Fail the whole perform with this reason
    FullAbort {
        /// Rendered reason, prefix chain included
        reason: String,
    },
    /// Switch providers and retry the perform
    SwitchProvider {
        /// Target provider
        provider: String,
        /// Why the switch happened
        reason: String,
    },
    /// Reserved: re-resolve cached artifacts. No consumer exists.
    Recache {
        /// Why the recache was requested
        reason: String,
    },
}

/// State shared by all hooks of one `(profile, usecase)`.
pub struct PerformContext {
    /// Failover router owning per-provider policies
    pub router: FailoverRouter,
    /// Action queued for the perform boundary
    pub queued_action: Option<QueuedAction>,
}

impl PerformContext {
    /// Create a context around a router.
    pub fn new(router: FailoverRouter) -> Self {
        Self {
            router,
            queued_action: None,
        }
    }

    /// Take the queued action, leaving the slot empty.
    pub fn take_action(&mut self) -> Option<QueuedAction> {
        self.queued_action.take()
    }
}

/// Process-wide map of perform contexts, one per client instance.
#[derive(Default)]
pub struct HookContextMap {
    contexts: DashMap<String, Arc<Mutex<PerformContext>>>,
}

impl HookContextMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the context for a key (`profileId/usecase`).
    pub fn get(&self, key: &str) -> Option<Arc<Mutex<PerformContext>>> {
        self.contexts.get(key).map(|entry| Arc::clone(&entry))
    }

    /// Look up or create the context for a key.
    ///
    /// The router factory runs at most once per key; subsequent performs on
    /// the same use case share the router, so circuit-breaker state persists
    /// across calls.
    pub fn get_or_create(
        &self,
        key: &str,
        make_router: impl FnOnce() -> FailoverRouter,
    ) -> Arc<Mutex<PerformContext>> {
        let entry = self
            .contexts
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PerformContext::new(make_router()))));
        Arc::clone(&entry)
    }

    /// Number of tracked use cases.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True when no use case has been performed yet.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
