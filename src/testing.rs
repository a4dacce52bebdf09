//! In-process stream doubles for exercising the capture API
//!
//! A real deployment wraps a host reactive-stream library behind the
//! capability traits; the doubles here stand in for that library so the
//! core can be driven end to end without one.
//!
//! # Doubles
//!
//! - [`TestSubject`]: a push-driven stream with an optional replay buffer.
//!   With `replay(n)`, a new subscriber first receives the last `n`
//!   pushed values, which is the semantics the reload scenario depends on.
//! - [`CollectingObserver`]: records everything it is handed.
//! - [`pipe_into`]: subscribes a subject to a source, modeling a composed,
//!   multicast stage (`source.compose(replay(1))` becomes a replay subject
//!   fed by the source).
//!
//! # Example
//!
//! ```ignore
//! use streamscope::testing::{pipe_into, CollectingObserver, TestSubject};
//!
//! let source = TestSubject::new();
//! let shared = TestSubject::with_replay(1);
//! let _wiring = pipe_into(&source.clone().as_stream(), shared.clone());
//!
//! source.push(1.into());
//! source.push(2.into());
//!
//! let late = CollectingObserver::new();
//! shared.as_stream().subscribe(late.clone());
//! assert_eq!(late.values(), vec![2.into()]);
//! ```

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streamscope_core::{ObserverOps, StreamOps, SubscriptionOps};

/// Push-driven stream double with an optional replay buffer.
pub struct TestSubject {
    replay: usize,
    buffer: Mutex<VecDeque<JsonValue>>,
    observers: Mutex<Vec<(Arc<dyn ObserverOps>, Arc<TestSubscription>)>>,
    connected: AtomicBool,
}

impl TestSubject {
    /// A subject that delivers only values pushed after subscription.
    pub fn new() -> Arc<Self> {
        Self::with_replay(0)
    }

    /// A subject replaying the last `replay` values to each new subscriber.
    pub fn with_replay(replay: usize) -> Arc<Self> {
        Arc::new(Self {
            replay,
            buffer: Mutex::new(VecDeque::new()),
            observers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        })
    }

    /// This subject as a capability trait object.
    pub fn as_stream(self: &Arc<Self>) -> Arc<dyn StreamOps> {
        self.clone()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .count()
    }

    /// True while multicasting is switched on.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl StreamOps for TestSubject {
    fn subscribe(&self, observer: Arc<dyn ObserverOps>) -> Arc<dyn SubscriptionOps> {
        let handle = Arc::new(TestSubscription {
            closed: AtomicBool::new(false),
        });
        if self.replay > 0 {
            for value in self.buffer.lock().iter() {
                observer.on_element(value.clone());
            }
        }
        self.observers.lock().push((observer, handle.clone()));
        handle
    }

    fn push(&self, value: JsonValue) {
        if self.replay > 0 {
            let mut buffer = self.buffer.lock();
            if buffer.len() == self.replay {
                buffer.pop_front();
            }
            buffer.push_back(value.clone());
        } else {
            // Keep only the latest value for `latest()` queries.
            let mut buffer = self.buffer.lock();
            buffer.clear();
            buffer.push_back(value.clone());
        }
        let observers = self.observers.lock().clone();
        for (observer, handle) in observers {
            if !handle.is_closed() {
                observer.on_element(value.clone());
            }
        }
    }

    fn latest(&self) -> Option<JsonValue> {
        self.buffer.lock().back().cloned()
    }

    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Handle handed out by [`TestSubject::subscribe`].
pub struct TestSubscription {
    closed: AtomicBool,
}

impl SubscriptionOps for TestSubscription {
    fn unsubscribe(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Observer double that records everything delivered to it.
#[derive(Default)]
pub struct CollectingObserver {
    values: Mutex<Vec<JsonValue>>,
    errors: Mutex<Vec<JsonValue>>,
    completed: AtomicBool,
}

impl CollectingObserver {
    /// A fresh, empty collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Elements received so far.
    pub fn values(&self) -> Vec<JsonValue> {
        self.values.lock().clone()
    }

    /// Errors received so far.
    pub fn errors(&self) -> Vec<JsonValue> {
        self.errors.lock().clone()
    }

    /// True once `on_complete` has been delivered.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }
}

impl ObserverOps for CollectingObserver {
    fn on_element(&self, value: JsonValue) {
        self.values.lock().push(value);
    }

    fn on_error(&self, error: JsonValue) {
        self.errors.lock().push(error);
    }

    fn on_complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }
}

struct ForwardingObserver {
    sink: Arc<TestSubject>,
}

impl ObserverOps for ForwardingObserver {
    fn on_element(&self, value: JsonValue) {
        self.sink.push(value);
    }

    fn on_error(&self, _error: JsonValue) {}

    fn on_complete(&self) {}
}

/// Wire `source`'s elements into `sink`, returning the wiring handle.
///
/// Models a composed multicast stage: a replay subject fed by a source
/// behaves like `source.compose(replay(n))`.
pub fn pipe_into(source: &Arc<dyn StreamOps>, sink: Arc<TestSubject>) -> Arc<dyn SubscriptionOps> {
    source.subscribe(Arc::new(ForwardingObserver { sink }))
}
