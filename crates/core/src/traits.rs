//! Capability traits for host stream objects
//!
//! The core never inspects host values structurally. A host library adapter
//! wraps its stream, observer, and handle types in these traits; anything
//! implementing `StreamOps` is "a stream" as far as tracking is concerned.
//!
//! Identity matters more than behavior here: tracked objects are keyed by
//! the address of their `Arc` allocation, held weakly, so the entity store
//! never keeps a host object alive.

use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Observer half of a subscription, as seen by the core.
pub trait ObserverOps: Send + Sync + 'static {
    /// An element was delivered.
    fn on_element(&self, value: JsonValue);
    /// An error was delivered.
    fn on_error(&self, error: JsonValue);
    /// The source completed.
    fn on_complete(&self);
}

/// Handle returned by a subscribe call, as seen by the core.
pub trait SubscriptionOps: Send + Sync + 'static {
    /// Stop consuming. Must be idempotent.
    fn unsubscribe(&self);
    /// True once torn down.
    fn is_closed(&self) -> bool;
}

/// Capability surface the core needs from a host stream object.
///
/// `push`, `latest`, `connect`, and `disconnect` have no-op defaults
/// because not every stream has an input side, a readable buffer, or
/// multicast control; a stable wrapper overrides all of them to delegate.
pub trait StreamOps: Send + Sync + 'static {
    /// Begin consuming; returns the host's subscription handle.
    fn subscribe(&self, observer: Arc<dyn ObserverOps>) -> Arc<dyn SubscriptionOps>;

    /// Feed a value into the input side, if this stream has one.
    fn push(&self, value: JsonValue) {
        let _ = value;
    }

    /// Current readable value or replay buffer tail, if the stream
    /// retains one.
    fn latest(&self) -> Option<JsonValue> {
        None
    }

    /// Start multicasting, if the stream supports it.
    fn connect(&self) {}

    /// Stop multicasting, if the stream supports it.
    fn disconnect(&self) {}
}

/// Identity key of a tracked object: the address of its `Arc` allocation.
///
/// Valid for equality only while the allocation is live; the entity store
/// pairs it with a `Weak` and treats a dead entry as a miss, which also
/// covers address reuse after collection.
pub fn identity_key(obj: &Arc<dyn StreamOps>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl StreamOps for Dummy {
        fn subscribe(&self, _observer: Arc<dyn ObserverOps>) -> Arc<dyn SubscriptionOps> {
            struct Closed;
            impl SubscriptionOps for Closed {
                fn unsubscribe(&self) {}
                fn is_closed(&self) -> bool {
                    true
                }
            }
            Arc::new(Closed)
        }
    }

    #[test]
    fn test_identity_key_stable_across_clones() {
        let a: Arc<dyn StreamOps> = Arc::new(Dummy);
        let b = Arc::clone(&a);
        assert_eq!(identity_key(&a), identity_key(&b));
    }

    #[test]
    fn test_identity_key_distinct_objects() {
        let a: Arc<dyn StreamOps> = Arc::new(Dummy);
        let b: Arc<dyn StreamOps> = Arc::new(Dummy);
        assert_ne!(identity_key(&a), identity_key(&b));
    }

    #[test]
    fn test_default_capabilities_are_noops() {
        let a: Arc<dyn StreamOps> = Arc::new(Dummy);
        a.push(JsonValue::from(1));
        a.connect();
        a.disconnect();
        assert!(a.latest().is_none());
    }
}
