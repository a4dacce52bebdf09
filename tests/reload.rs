//! Live-reload scenarios: wrapper identity across sessions, delegation to
//! the newest backing pipeline, and strict isolation of pre-reload data.
//!
//! The module under simulated reload defines
//! `source = factory()` and `shared = source.compose(replay(1))` under the
//! structural keys `"source"` / `"shared"`.

mod common;

use common::new_tracker;
use std::sync::Arc;
use streamscope::testing::{pipe_into, CollectingObserver, TestSubject};
use streamscope::{ModuleScope, StableWrapper, StreamOps, SubscriptionOps, Tracker};

const MODULE: &str = "app/streams";

struct ModulePass {
    source_wrapper: Arc<StableWrapper>,
    shared_wrapper: Arc<StableWrapper>,
    // Wiring between source and the replay stage; dropped with the pass
    // only in the test's own teardown, as the host module would.
    _wiring: Arc<dyn SubscriptionOps>,
}

/// Execute one pass of the module's top level, as generated glue would.
fn run_module(tracker: &Tracker) -> ModulePass {
    let scope: ModuleScope<'_> = tracker.begin_module_session(MODULE);

    let source = TestSubject::new();
    let shared = TestSubject::with_replay(1);
    let wiring = pipe_into(&source.as_stream(), shared.clone());

    let source_wrapper = scope
        .resolve("source", || source.as_stream())
        .expect("source resolves");
    let shared_wrapper = scope
        .resolve("shared", || shared.as_stream())
        .expect("shared resolves");
    scope.end();

    ModulePass {
        source_wrapper,
        shared_wrapper,
        _wiring: wiring,
    }
}

#[test]
fn late_subscriber_receives_replay_tail() {
    let tracker = new_tracker();
    let pass = run_module(&tracker);

    pass.source_wrapper.push(1.into());
    pass.source_wrapper.push(2.into());

    let late = CollectingObserver::new();
    pass.shared_wrapper.subscribe(late.clone());
    assert_eq!(late.values(), vec![serde_json::Value::from(2)]);
}

#[test]
fn wrapper_identity_survives_reload() {
    let tracker = new_tracker();
    let pass1 = run_module(&tracker);
    let pass2 = run_module(&tracker);

    assert!(Arc::ptr_eq(&pass1.source_wrapper, &pass2.source_wrapper));
    assert!(Arc::ptr_eq(&pass1.shared_wrapper, &pass2.shared_wrapper));
}

#[test]
fn pushes_after_reload_flow_through_the_new_pipeline() {
    let tracker = new_tracker();
    let pass1 = run_module(&tracker);

    pass1.source_wrapper.push(1.into());
    pass1.source_wrapper.push(2.into());

    let pass2 = run_module(&tracker);

    // The pre-reload reference is the same wrapper; a push through it
    // reaches the session-2 pipeline.
    let observer = CollectingObserver::new();
    pass1.shared_wrapper.subscribe(observer.clone());
    pass1.source_wrapper.push(3.into());
    assert_eq!(observer.values(), vec![serde_json::Value::from(3)]);
    drop(pass2);
}

#[test]
fn subscriber_after_reload_sees_only_new_session_data() {
    let tracker = new_tracker();
    let pass1 = run_module(&tracker);

    // Session-1 data fills the replay buffer.
    pass1.source_wrapper.push(1.into());
    pass1.source_wrapper.push(2.into());

    let _pass2 = run_module(&tracker);

    // Attaching only after session 2: the session-1 value 2 must never
    // appear, even though the old target's replay buffer still holds it.
    let observer = CollectingObserver::new();
    pass1.shared_wrapper.subscribe(observer.clone());
    assert_eq!(observer.values(), Vec::<serde_json::Value>::new());

    pass1.source_wrapper.push(3.into());
    assert_eq!(observer.values(), vec![serde_json::Value::from(3)]);
}

#[test]
fn readable_value_prefers_the_live_target() {
    let tracker = new_tracker();
    let pass1 = run_module(&tracker);

    pass1.source_wrapper.push(1.into());
    pass1.source_wrapper.push(2.into());
    assert_eq!(
        pass1.shared_wrapper.latest(),
        Some(serde_json::Value::from(2))
    );

    let _pass2 = run_module(&tracker);

    // The freshly reassigned target has no buffered value yet; the
    // wrapper reports that, never the stale session-1 value.
    assert_eq!(pass1.shared_wrapper.latest(), None);

    pass1.source_wrapper.push(3.into());
    assert_eq!(
        pass1.shared_wrapper.latest(),
        Some(serde_json::Value::from(3))
    );
}

#[test]
fn tracked_subscribe_through_wrapper_observes_new_target() {
    let tracker = new_tracker();
    let pass1 = run_module(&tracker);
    pass1.source_wrapper.push(1.into());

    let _pass2 = run_module(&tracker);

    let observer = CollectingObserver::new();
    let wrapper_stream: Arc<dyn StreamOps> = pass1.shared_wrapper.clone();
    let handle = tracker.on_subscribe(&wrapper_stream, observer.clone());

    pass1.source_wrapper.push(4.into());
    assert_eq!(observer.values(), vec![serde_json::Value::from(4)]);

    // Emission capture works through the wrapper like any other stream.
    let record = tracker.subscription(handle.id()).unwrap();
    assert_eq!(record.emission_ids.len(), 1);
}

#[test]
fn dropped_key_is_orphaned_and_reported() {
    let tracker = new_tracker();

    let scope = tracker.begin_module_session(MODULE);
    let extra = TestSubject::new();
    scope.resolve("source", || TestSubject::new().as_stream()).unwrap();
    let extra_wrapper = scope.resolve("extra", || extra.as_stream()).unwrap();
    scope.end();

    // Next pass no longer mentions "extra".
    let scope = tracker.begin_module_session(MODULE);
    scope.resolve("source", || TestSubject::new().as_stream()).unwrap();
    scope.end();

    let record = tracker
        .by_id(extra_wrapper.id())
        .expect("wrapper record queryable");
    assert_eq!(record["orphaned"], true);
    assert_eq!(record["key"], "extra");
}

#[test]
fn session_records_chronicle_each_pass() {
    let tracker = new_tracker();

    let scope1 = tracker.begin_module_session(MODULE);
    let first_id = scope1.record_id();
    scope1.resolve("source", || TestSubject::new().as_stream()).unwrap();
    scope1.end();

    let scope2 = tracker.begin_module_session(MODULE);
    let second_id = scope2.record_id();
    scope2.resolve("source", || TestSubject::new().as_stream()).unwrap();
    scope2.end();

    let first = tracker.by_id(first_id).unwrap();
    let second = tracker.by_id(second_id).unwrap();
    assert_eq!(first["ordinal"], 1);
    assert_eq!(second["ordinal"], 2);
    assert_eq!(first["keys"][0], "source");
    assert!(first["ended_at"].is_i64());
}
