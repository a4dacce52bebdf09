//! streamscope - instrumentation core for debugging reactive-stream
//! pipelines
//!
//! Streamscope observes the lifecycle of stream objects (creation,
//! composition, subscription, emission, teardown) and reconstructs a
//! navigable history for a debugger UI, transparently to the application
//! under observation. Two problems shape the design: deciding at
//! construction time *why* a stream exists (pipe time, subscribe time, or
//! as a combinator argument), and keeping every tracked identity stable
//! across live code reloads without retaining objects the host runtime
//! would otherwise reclaim.
//!
//! # Quick Start
//!
//! ```ignore
//! use streamscope::{tracker, testing::{CollectingObserver, TestSubject}};
//!
//! let tracker = tracker();
//!
//! // An adapter reports a construction; the record explains the stream.
//! let subject = TestSubject::new();
//! let record = tracker.on_construct(&subject.as_stream(), None);
//! assert!(record.dynamic_origin.is_none()); // pipe time
//!
//! // Subscriptions, emissions, and teardown flow through the same API.
//! let observer = CollectingObserver::new();
//! let handle = tracker.on_subscribe(&subject.as_stream(), observer);
//! subject.push(1.into());
//! handle.unsubscribe();
//! ```
//!
//! # Architecture
//!
//! Host-library shims call the hook surface ([`Tracker`], abstracted as
//! [`hooks::StreamHooks`]); every entity-store mutation is published on a
//! single ordered event channel consumed by storage/UI collaborators.
//! Generated glue brackets each module execution with
//! [`Tracker::begin_module_session`], which resolves structural keys to
//! stable wrappers surviving live reloads.

pub mod hooks;
pub mod testing;
pub mod tracker;

pub use hooks::StreamHooks;
pub use tracker::{ComposeScope, ModuleScope, TrackedSubscription, Tracker};

pub use streamscope_context::{
    CompositionFrame, ContextStacks, StreamOrigin, SubscriptionFrame, TransformFrame,
};
pub use streamscope_core::{
    ArchiveConfig, ArgumentBinding, ArgumentInvocation, ArgumentRef, CompositionRecord,
    Diagnostic, DynamicOrigin, EntityId, Error, EventAction, IdKind, LifecycleEvent, ModuleSessionRecord,
    ObserverOps, RelationshipRecord, Result, SourceLocation, StableWrapperRecord, StackKind,
    StreamOps, StreamRecord, SubscriptionOps, SubscriptionRecord, TrackerConfig, TrackingEvent,
    TransformApplication, TransformFactoryRecord,
};
pub use streamscope_events::{EventBus, SubscriberToken};
pub use streamscope_session::{ModuleRegistry, ModuleSession, StableWrapper};
pub use streamscope_store::{ArgumentValue, EntityStore, RelationshipIndexer};

use once_cell::sync::Lazy;
use std::sync::Arc;

// One process-wide tracking context. Adapters that need isolation (tests,
// embedded debuggers) construct their own Tracker instead.
static GLOBAL_TRACKER: Lazy<Arc<Tracker>> =
    Lazy::new(|| Arc::new(Tracker::new(TrackerConfig::default())));

/// The process-wide tracker shared by all adapters.
pub fn tracker() -> Arc<Tracker> {
    GLOBAL_TRACKER.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_tracker_is_shared() {
        let a = tracker();
        let b = tracker();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
