//! The tracker: one explicit tracking context wiring every subsystem
//!
//! A [`Tracker`] owns the id allocator, the context stack trio, the entity
//! store, the relationship indexer, the module registry, and the event bus,
//! and exposes the capture API the host-library shims call. It is a plain
//! value with an explicit lifecycle; [`crate::tracker()`] hands out the
//! process-wide instance for adapters that want shared state.
//!
//! Everything here is fail-open: capture never raises into the application,
//! lookups miss with `None`, teardown is idempotent, and user-callback
//! panics unwind through stack guards without corrupting attribution.

use serde::Serialize;
use serde_json::Value as JsonValue;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streamscope_context::{
    CompositionFrame, CompositionGuard, ContextStacks, StreamOrigin, TransformFrame,
    TransformGuard,
};
use streamscope_core::diag::{shared_diagnostics, Diagnostic, SharedDiagnostics};
use streamscope_core::{
    now_millis, record_payload, ArgumentBinding, ArgumentInvocation, ArgumentRef,
    CompositionRecord, DynamicOrigin, EntityId, EventAction, IdKind, LifecycleEvent,
    ObserverOps, Result, SourceLocation, StreamOps, StreamRecord, SubscriptionOps,
    RelationshipRecord, SubscriptionRecord, TrackerConfig, TrackingEvent,
    TransformApplication, TransformFactoryRecord,
};
use streamscope_events::{EventBus, SubscriberToken};
use streamscope_session::{ModuleRegistry, ModuleSession, StableWrapper};
use streamscope_store::{scan_arguments, ArgumentValue, EntityStore, RelationshipIndexer};

/// The instrumentation core's central context.
pub struct Tracker {
    config: TrackerConfig,
    alloc: streamscope_core::SharedAllocator,
    bus: EventBus,
    diagnostics: SharedDiagnostics,
    stacks: ContextStacks,
    store: Arc<EntityStore>,
    relations: Arc<RelationshipIndexer>,
    modules: Arc<ModuleRegistry>,
}

impl Tracker {
    /// Create a tracker with its own allocator, stores, and event channel.
    pub fn new(config: TrackerConfig) -> Self {
        let alloc = streamscope_core::SharedAllocator::new();
        let bus = EventBus::new();
        let diagnostics = shared_diagnostics(config.diagnostics_cap.0);
        let stacks = ContextStacks::new(diagnostics.clone());
        let store = Arc::new(EntityStore::new(bus.clone()));
        let relations = Arc::new(RelationshipIndexer::new(bus.clone()));
        let modules = Arc::new(ModuleRegistry::new(
            alloc.clone(),
            bus.clone(),
            diagnostics.clone(),
        ));
        Self {
            config,
            alloc,
            bus,
            diagnostics,
            stacks,
            store,
            relations,
            modules,
        }
    }

    // =========================================================================
    // Construction hooks
    // =========================================================================

    /// Interception point for a newly built stream.
    ///
    /// Consults the context stacks to decide why the stream exists: a
    /// non-empty transform-execution stack means subscribe-time, with
    /// origin fields inherited from the top frame; otherwise pipe-time.
    /// Idempotent on first sight of the object.
    pub fn on_construct(
        &self,
        obj: &Arc<dyn StreamOps>,
        location: Option<SourceLocation>,
    ) -> StreamRecord {
        self.store
            .ensure_registered(obj, || self.fresh_stream_record(location))
    }

    /// Lazily register an object the shims could not intercept at
    /// construction. Captures whatever context exists now, which is
    /// necessarily subscribe-time; that approximation is intended.
    pub fn ensure_registered(&self, obj: &Arc<dyn StreamOps>) -> StreamRecord {
        self.on_construct(obj, None)
    }

    fn fresh_stream_record(&self, location: Option<SourceLocation>) -> StreamRecord {
        let mut record = StreamRecord::new(self.alloc.next(IdKind::Stream), location);
        if let StreamOrigin::SubscribeTime(frame) = self.stacks.origin() {
            record.dynamic_origin = Some(DynamicOrigin {
                transform_name: frame.transform_name,
                transform_instance: frame.instance,
                trigger_subscription: frame.trigger_subscription,
                trigger_stream: frame.trigger_stream,
                trigger_event: frame.trigger_event,
            });
        }
        if let Some(composition) = self.stacks.current_composition() {
            record.composition_group = Some(composition.group);
        }
        record
    }

    // =========================================================================
    // Composition hooks
    // =========================================================================

    /// Open the composition context around one "compose N transforms onto
    /// a stream" call. Streams constructed while the scope is open carry
    /// its composition-session id.
    pub fn begin_compose(
        &self,
        source: &Arc<dyn StreamOps>,
        transform_names: &[&str],
    ) -> ComposeScope {
        let source_record = self.ensure_registered(source);
        let group = self.alloc.next(IdKind::Composition);
        let names: SmallVec<[String; 4]> = transform_names
            .iter()
            .map(|name| name.to_string())
            .collect();
        let guard = self.stacks.push_composition(CompositionFrame {
            source: source_record.id,
            transform_names: names.clone(),
            group,
        });
        ComposeScope {
            guard,
            group,
            source_id: source_record.id,
            source_path: source_record.path,
            transform_names: names,
        }
    }

    /// Close a composition scope, recording the composition and amending
    /// the result stream with parent, operator chain, and path.
    ///
    /// `steps` are each transform's output stream in order; the last one
    /// is the composition result. The result's hierarchical path becomes
    /// `parent_path.k` with `k` the number of transforms, or `k` alone
    /// when the parent path is empty.
    pub fn finish_compose(
        &self,
        scope: ComposeScope,
        steps: &[Arc<dyn StreamOps>],
    ) -> Option<CompositionRecord> {
        let ComposeScope {
            guard,
            group,
            source_id,
            source_path,
            transform_names,
        } = scope;

        let result = steps.last()?;
        let result_record = self.ensure_registered(result);

        // Per-step records require one output stream per transform; a shim
        // that only saw the overall result skips them.
        if steps.len() == transform_names.len() {
            let mut previous = source_id;
            for (index, (step, name)) in steps.iter().zip(transform_names.iter()).enumerate() {
                let step_id = self.ensure_registered(step).id;
                let factory = TransformFactoryRecord {
                    id: self.alloc.next(IdKind::TransformFactory),
                    name: name.clone(),
                    instance_id: self.alloc.next(IdKind::Transform),
                };
                self.store.record_factory(factory.clone());
                self.store.record_application(TransformApplication {
                    id: factory.instance_id,
                    index,
                    source_id: previous,
                    target_id: step_id,
                    factory_id: factory.id,
                });
                previous = step_id;
            }
        }

        let k = transform_names.len();
        let path = if source_path.is_empty() {
            k.to_string()
        } else {
            format!("{source_path}.{k}")
        };
        self.store.amend_stream(result_record.id, |record| {
            record.operator_chain = transform_names.clone();
            record.composition_parent = Some(source_id);
            record.composition_group = Some(group);
            record.path = path.clone();
        });

        let record = CompositionRecord {
            id: group,
            source_id,
            result_id: result_record.id,
            group_id: group,
        };
        self.store.record_composition(record.clone());
        drop(guard);
        Some(record)
    }

    /// Record an operator factory call (`map(f)`, `switch_map(f)`, ...),
    /// minting the instance id later used by [`Tracker::transform_scope`].
    pub fn on_transform_factory(&self, name: &str) -> TransformFactoryRecord {
        let record = TransformFactoryRecord {
            id: self.alloc.next(IdKind::TransformFactory),
            name: name.to_string(),
            instance_id: self.alloc.next(IdKind::Transform),
        };
        self.store.record_factory(record.clone());
        record
    }

    /// Open the transform-execution context around a user callback of a
    /// stream-producing transform. Streams constructed while the guard is
    /// alive are attributed to this transform, even if the callback
    /// panics partway through.
    pub fn transform_scope(
        &self,
        factory: &TransformFactoryRecord,
        trigger_subscription: Option<EntityId>,
        trigger_stream: Option<EntityId>,
        trigger_event: LifecycleEvent,
    ) -> TransformGuard {
        self.stacks.push_transform(TransformFrame {
            transform_name: factory.name.clone(),
            instance: factory.instance_id,
            trigger_subscription,
            trigger_stream,
            trigger_event,
        })
    }

    // =========================================================================
    // Subscription hooks
    // =========================================================================

    /// Interception point around a subscribe call.
    ///
    /// Pushes the subscription context for the call's synchronous extent,
    /// wraps the observer so emissions and errors are captured without
    /// altering timing, performs the host subscribe, and returns a handle
    /// whose teardown archives the subscription exactly once.
    pub fn on_subscribe(
        &self,
        stream: &Arc<dyn StreamOps>,
        observer: Arc<dyn ObserverOps>,
    ) -> Arc<TrackedSubscription> {
        let stream_record = self.ensure_registered(stream);
        let id = self.alloc.next(IdKind::Subscription);
        let (guard, frame) = self.stacks.push_subscription(id, stream_record.id);
        self.store.register_subscription(SubscriptionRecord::new(
            id,
            stream_record.id,
            frame.parent,
        ));
        let wrapped: Arc<dyn ObserverOps> = Arc::new(TrackedObserver {
            inner: observer,
            store: self.store.clone(),
            bus: self.bus.clone(),
            alloc: self.alloc.clone(),
            subscription_id: id,
            stream_id: stream_record.id,
        });
        let inner = stream.subscribe(wrapped);
        drop(guard);
        Arc::new(TrackedSubscription {
            id,
            inner,
            store: self.store.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Interception point for teardown. Idempotent; returns true only when
    /// this call archived the subscription.
    pub fn on_unsubscribe(&self, subscription: EntityId) -> bool {
        self.store.archive_subscription(subscription, now_millis())
    }

    // =========================================================================
    // Argument hooks
    // =========================================================================

    /// Scan a combinator call's arguments for tracked streams and record
    /// the relationship. Returns `None` when no stream argument was
    /// detected.
    pub fn observe_arguments(
        &self,
        operator_name: &str,
        args: &[ArgumentValue],
        result: Option<&Arc<dyn StreamOps>>,
    ) -> Option<RelationshipRecord> {
        let scan = scan_arguments(args);
        if scan.streams.is_empty() {
            return None;
        }
        let id = self.alloc.next(IdKind::Relationship);
        let instance_id = self.alloc.next(IdKind::Transform);
        let mut arguments = std::collections::BTreeMap::new();
        for detected in &scan.streams {
            let stream_record = self.ensure_registered(detected.obj);
            arguments.insert(detected.path.clone(), stream_record.id);
        }
        let record = RelationshipRecord {
            id,
            operator_name: operator_name.to_string(),
            instance_id,
            result_id: result.map(|obj| self.ensure_registered(obj).id),
            arguments: arguments.clone(),
        };
        self.relations.insert(record.clone());

        for (path, stream_id) in &arguments {
            self.relations.insert_binding(ArgumentBinding {
                id: self.alloc.next(IdKind::Argument),
                owner_id: id,
                path: path.clone(),
                value: ArgumentRef::Stream { id: *stream_id },
            });
        }
        for function in &scan.functions {
            self.relations.insert_binding(ArgumentBinding {
                id: self.alloc.next(IdKind::Argument),
                owner_id: id,
                path: function.path.clone(),
                value: ArgumentRef::Function {
                    name: function.name.clone(),
                },
            });
        }
        Some(record)
    }

    /// Record that a function-valued argument ran. Unknown bindings are a
    /// miss, not an error.
    pub fn record_argument_invocation(
        &self,
        binding_id: EntityId,
    ) -> Option<ArgumentInvocation> {
        self.relations.binding(binding_id)?;
        let invocation = ArgumentInvocation {
            id: self.alloc.next(IdKind::Invocation),
            binding_id,
            invoked_at: now_millis(),
        };
        self.relations.record_invocation(invocation.clone());
        Some(invocation)
    }

    // =========================================================================
    // Module sessions
    // =========================================================================

    /// Begin one bracketed execution pass of a module's top level. Called
    /// once per module execution by generated glue code.
    pub fn begin_module_session(&self, module_id: &str) -> ModuleScope<'_> {
        ModuleScope {
            tracker: self,
            session: self.modules.start(module_id),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// JSON view of any record by id, for the debugger UI.
    pub fn by_id(&self, id: EntityId) -> Option<JsonValue> {
        match id.kind() {
            IdKind::Stream => self.store.stream(id).map(|r| record_payload(&r)),
            IdKind::Subscription => self.store.subscription(id).map(|r| record_payload(&r)),
            IdKind::Composition => self.store.composition(id).map(|r| record_payload(&r)),
            IdKind::Transform => self.store.application(id).map(|r| record_payload(&r)),
            IdKind::TransformFactory => self.store.factory(id).map(|r| record_payload(&r)),
            IdKind::Relationship => self.relations.relationship(id).map(|r| record_payload(&r)),
            IdKind::Argument => self.relations.binding(id).map(|r| record_payload(&r)),
            IdKind::Invocation => self.relations.invocation(id).map(|r| record_payload(&r)),
            IdKind::Wrapper => self.modules.wrapper_record(id).map(|r| record_payload(&r)),
            IdKind::Session => self.modules.session_record(id).map(|r| record_payload(&r)),
            // Emissions and errors exist only on the event channel.
            IdKind::Emission | IdKind::ErrorEvent => None,
        }
    }

    /// Stream record by id.
    pub fn stream(&self, id: EntityId) -> Option<StreamRecord> {
        self.store.stream(id)
    }

    /// Subscription record by id, active or archived.
    pub fn subscription(&self, id: EntityId) -> Option<SubscriptionRecord> {
        self.store.subscription(id)
    }

    /// Ids of subscriptions currently consuming `stream_id`.
    pub fn active_subscriptions_for(&self, stream_id: EntityId) -> Vec<EntityId> {
        self.store.active_for(stream_id)
    }

    /// Ids of relationships with `stream_id` among their arguments.
    pub fn relationships_using(&self, stream_id: EntityId) -> Vec<EntityId> {
        self.relations.relationships_using(stream_id)
    }

    /// Retained diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().entries()
    }

    /// Register an event-channel consumer.
    pub fn subscribe_events<F>(&self, callback: F) -> SubscriberToken
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    /// Remove an event-channel consumer.
    pub fn unsubscribe_events(&self, token: SubscriberToken) {
        self.bus.unsubscribe(token)
    }

    /// Archived subscriptions currently retained.
    pub fn archived_subscriptions(&self) -> usize {
        self.store.archived_count()
    }

    /// Run one archive cleanup pass against the configured caps.
    pub fn cleanup_archive(&self) -> usize {
        self.store.evict_archive(&self.config.archive, now_millis())
    }

    /// The entity store, for adapters needing direct access.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The context stacks, for shims driving scopes manually.
    pub fn stacks(&self) -> &ContextStacks {
        &self.stacks
    }

    /// Test-only: destroy all tracked state and restart id allocation.
    pub fn reset_for_tests(&self) {
        self.alloc.reset();
        self.stacks.reset();
        self.store.reset();
        self.relations.reset();
        self.modules.reset();
        self.diagnostics.lock().clear();
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("store", &self.store)
            .field("modules", &self.modules)
            .finish()
    }
}

/// Open composition context returned by [`Tracker::begin_compose`].
#[must_use = "finish the scope with Tracker::finish_compose"]
pub struct ComposeScope {
    guard: CompositionGuard,
    group: EntityId,
    source_id: EntityId,
    source_path: String,
    transform_names: SmallVec<[String; 4]>,
}

impl ComposeScope {
    /// The composition-session id minted for this call.
    pub fn group(&self) -> EntityId {
        self.group
    }

    /// Id of the stream being composed onto.
    pub fn source_id(&self) -> EntityId {
        self.source_id
    }
}

/// One bracketed module execution pass, tied to the tracker that opened it.
pub struct ModuleScope<'t> {
    tracker: &'t Tracker,
    session: ModuleSession,
}

impl ModuleScope<'_> {
    /// Resolve a structural key against the module's wrapper table.
    ///
    /// `factory` is invoked exactly once; its product becomes the
    /// wrapper's new delegation target and is registered like any other
    /// constructed stream.
    pub fn resolve(
        &self,
        key: &str,
        factory: impl FnOnce() -> Arc<dyn StreamOps>,
    ) -> Result<Arc<StableWrapper>> {
        let target = factory();
        let record = self.tracker.ensure_registered(&target);
        self.session.resolve(key, target, Some(record.id))
    }

    /// Finalize the pass; absent keys orphan their wrappers. Idempotent,
    /// and implied by drop.
    pub fn end(&self) {
        self.session.end();
    }

    /// Id of this pass's session record.
    pub fn record_id(&self) -> EntityId {
        self.session.record_id()
    }
}

/// Observer wrapper capturing emissions and errors without altering timing.
struct TrackedObserver {
    inner: Arc<dyn ObserverOps>,
    store: Arc<EntityStore>,
    bus: EventBus,
    alloc: streamscope_core::SharedAllocator,
    subscription_id: EntityId,
    stream_id: EntityId,
}

#[derive(Serialize)]
struct EmissionPayload<'a> {
    id: EntityId,
    subscription_id: EntityId,
    stream_id: EntityId,
    value: &'a JsonValue,
}

impl ObserverOps for TrackedObserver {
    fn on_element(&self, value: JsonValue) {
        let id = self.alloc.next(IdKind::Emission);
        self.store.append_emission(self.subscription_id, id, false);
        self.bus.publish(
            IdKind::Emission,
            id,
            EventAction::Created,
            record_payload(&EmissionPayload {
                id,
                subscription_id: self.subscription_id,
                stream_id: self.stream_id,
                value: &value,
            }),
        );
        self.inner.on_element(value);
    }

    fn on_error(&self, error: JsonValue) {
        let id = self.alloc.next(IdKind::ErrorEvent);
        self.store.append_emission(self.subscription_id, id, true);
        self.bus.publish(
            IdKind::ErrorEvent,
            id,
            EventAction::Created,
            record_payload(&EmissionPayload {
                id,
                subscription_id: self.subscription_id,
                stream_id: self.stream_id,
                value: &error,
            }),
        );
        // An error terminates the subscription.
        self.store
            .archive_subscription(self.subscription_id, now_millis());
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        self.store
            .archive_subscription(self.subscription_id, now_millis());
        self.inner.on_complete();
    }
}

/// Subscription handle returned by [`Tracker::on_subscribe`].
///
/// Teardown archives the tracked record exactly once, no matter how many
/// redundant close calls arrive.
pub struct TrackedSubscription {
    id: EntityId,
    inner: Arc<dyn SubscriptionOps>,
    store: Arc<EntityStore>,
    closed: AtomicBool,
}

impl TrackedSubscription {
    /// Id of the tracked subscription record.
    pub fn id(&self) -> EntityId {
        self.id
    }
}

impl SubscriptionOps for TrackedSubscription {
    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.unsubscribe();
        self.store.archive_subscription(self.id, now_millis());
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.inner.is_closed()
    }
}
