//! Hook interfaces between host-library adapters and the core
//!
//! Interception mechanics (method replacement, constructor wrapping,
//! whatever the host offers) belong to a thin adapter layer. The adapter
//! calls these interfaces; the core depends only on them and never on a
//! specific interception mechanism. [`Tracker`] is the canonical
//! implementation.

use crate::tracker::{Tracker, TrackedSubscription};
use std::sync::Arc;
use streamscope_core::{
    EntityId, ObserverOps, RelationshipRecord, SourceLocation, StreamOps, StreamRecord,
};
use streamscope_store::ArgumentValue;

/// Object-level interception points a host adapter drives.
///
/// Scoped interception (composition brackets, transform-execution scopes,
/// module sessions) returns guards and lives as inherent [`Tracker`]
/// methods; this trait covers the four hooks that need no scope.
pub trait StreamHooks: Send + Sync {
    /// A stream object was just constructed.
    fn on_construct(
        &self,
        obj: &Arc<dyn StreamOps>,
        location: Option<SourceLocation>,
    ) -> StreamRecord;

    /// A subscribe call is happening; wrap the observer, perform the host
    /// subscribe, and return the tracked handle.
    fn on_subscribe(
        &self,
        stream: &Arc<dyn StreamOps>,
        observer: Arc<dyn ObserverOps>,
    ) -> Arc<TrackedSubscription>;

    /// A subscription handle was closed. Idempotent.
    fn on_unsubscribe(&self, subscription: EntityId) -> bool;

    /// A combinator ran; scan its arguments for tracked streams.
    fn on_combinator(
        &self,
        operator_name: &str,
        args: &[ArgumentValue],
        result: Option<&Arc<dyn StreamOps>>,
    ) -> Option<RelationshipRecord>;
}

impl StreamHooks for Tracker {
    fn on_construct(
        &self,
        obj: &Arc<dyn StreamOps>,
        location: Option<SourceLocation>,
    ) -> StreamRecord {
        Tracker::on_construct(self, obj, location)
    }

    fn on_subscribe(
        &self,
        stream: &Arc<dyn StreamOps>,
        observer: Arc<dyn ObserverOps>,
    ) -> Arc<TrackedSubscription> {
        Tracker::on_subscribe(self, stream, observer)
    }

    fn on_unsubscribe(&self, subscription: EntityId) -> bool {
        Tracker::on_unsubscribe(self, subscription)
    }

    fn on_combinator(
        &self,
        operator_name: &str,
        args: &[ArgumentValue],
        result: Option<&Arc<dyn StreamOps>>,
    ) -> Option<RelationshipRecord> {
        Tracker::observe_arguments(self, operator_name, args, result)
    }
}
