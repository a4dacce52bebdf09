//! Stable wrapper
//!
//! A long-lived indirection handle for one structural key. Application code
//! holds the wrapper across live reloads; every operation delegates to the
//! *current* target at invocation time, so a reference obtained before a
//! reload automatically observes the post-reload pipeline.
//!
//! The wrapper caches nothing of its own. In particular `latest()` always
//! reads through to the live target: a wrapper must never prefer a value
//! captured at creation time over the freshly reassigned target's state.

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use streamscope_core::{EntityId, ObserverOps, StreamOps, SubscriptionOps};

/// Swappable indirection handle over a host stream.
pub struct StableWrapper {
    id: EntityId,
    module_id: String,
    key: String,
    target: RwLock<Arc<dyn StreamOps>>,
}

impl StableWrapper {
    /// Build a wrapper delegating to `target`.
    pub(crate) fn new(
        id: EntityId,
        module_id: String,
        key: String,
        target: Arc<dyn StreamOps>,
    ) -> Self {
        Self {
            id,
            module_id,
            key,
            target: RwLock::new(target),
        }
    }

    /// Wrapper entity id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Owning module.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Structural key this wrapper is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The target currently delegated to.
    pub fn current_target(&self) -> Arc<dyn StreamOps> {
        self.target.read().clone()
    }

    /// Swap in a fresh target, returning the previous one.
    pub(crate) fn swap_target(&self, target: Arc<dyn StreamOps>) -> Arc<dyn StreamOps> {
        std::mem::replace(&mut *self.target.write(), target)
    }
}

impl StreamOps for StableWrapper {
    fn subscribe(&self, observer: Arc<dyn ObserverOps>) -> Arc<dyn SubscriptionOps> {
        self.current_target().subscribe(observer)
    }

    fn push(&self, value: JsonValue) {
        self.current_target().push(value);
    }

    fn latest(&self) -> Option<JsonValue> {
        self.current_target().latest()
    }

    fn connect(&self) {
        self.current_target().connect();
    }

    fn disconnect(&self) {
        self.current_target().disconnect();
    }
}

impl std::fmt::Debug for StableWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StableWrapper")
            .field("id", &self.id)
            .field("module_id", &self.module_id)
            .field("key", &self.key)
            .finish()
    }
}
