//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::{Arc, Once};
use streamscope::{Tracker, TrackerConfig, TrackingEvent};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness once per process.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A tracker isolated from the process-wide instance.
pub fn new_tracker() -> Tracker {
    init_tracing();
    Tracker::new(TrackerConfig::default())
}

/// A tracker with a custom config, isolated from the global instance.
pub fn new_tracker_with(config: TrackerConfig) -> Tracker {
    init_tracing();
    Tracker::new(config)
}

/// Capture every event the tracker publishes from now on.
pub fn record_events(tracker: &Tracker) -> Arc<Mutex<Vec<TrackingEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    tracker.subscribe_events(move |event| sink.lock().push(event.clone()));
    events
}
