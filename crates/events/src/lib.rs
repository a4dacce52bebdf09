//! Ordered event bus for entity-store mutations
//!
//! ## Design Principles
//!
//! 1. **Single ordered channel**: every record creation/update is published
//!    as one `TrackingEvent` with a monotonic sequence number assigned in
//!    publish order.
//!
//! 2. **Re-entrancy safe**: a publish performed from inside a consumer
//!    callback is queued and drained by the outer dispatch loop. Processing
//!    a write never synchronously triggers processing of a write it itself
//!    caused within the same call stack.
//!
//! 3. **Fail-open**: a consumer that panics is dropped from the subscriber
//!    list; publishing itself never fails and never raises into the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use streamscope_core::{EntityId, EventAction, IdKind, TrackingEvent};

/// A registered consumer callback.
type Subscriber = Arc<dyn Fn(&TrackingEvent) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], usable to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberToken(u64);

#[derive(Default)]
struct BusInner {
    queue: VecDeque<TrackingEvent>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber: u64,
    next_seq: u64,
    draining: bool,
}

/// The single ordered event channel.
///
/// Cheap to clone; all clones share one queue and subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Callbacks run in publish order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberToken
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let token = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push((token, Arc::new(callback)));
        SubscriberToken(token)
    }

    /// Remove a consumer. Unknown tokens are a no-op.
    pub fn unsubscribe(&self, token: SubscriberToken) {
        self.inner.lock().subscribers.retain(|(t, _)| *t != token.0);
    }

    /// Publish one event; returns its channel sequence number.
    ///
    /// When called from inside a consumer callback the event is queued and
    /// dispatched after the current event finishes, by the same outer loop.
    pub fn publish(
        &self,
        kind: IdKind,
        id: EntityId,
        action: EventAction,
        data: JsonValue,
    ) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.queue.push_back(TrackingEvent {
                seq,
                kind,
                id,
                action,
                data,
            });
            if inner.draining {
                return seq;
            }
            inner.draining = true;
            seq
        };
        self.drain();
        seq
    }

    /// Number of events published so far.
    pub fn published(&self) -> u64 {
        self.inner.lock().next_seq
    }

    fn drain(&self) {
        loop {
            let (event, subscribers) = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(event) => (event, inner.subscribers.clone()),
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            for (token, subscriber) in subscribers {
                let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(&event)));
                if outcome.is_err() {
                    tracing::warn!(
                        target: "streamscope",
                        seq = event.seq,
                        "event consumer panicked; dropping it"
                    );
                    self.inner
                        .lock()
                        .subscribers
                        .retain(|(t, _)| *t != token);
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("subscriber_count", &inner.subscribers.len())
            .field("published", &inner.next_seq)
            .field("queued", &inner.queue.len())
            .finish()
    }
}
