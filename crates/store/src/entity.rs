//! Entity store
//!
//! ## Design Principles
//!
//! 1. **Arena + index**: stream records live in a dense table in
//!    registration order. A side table maps host-object identity (the
//!    address of the `Arc` allocation) to an arena slot, holding only a
//!    `Weak` so tracking never keeps a host object alive.
//!
//! 2. **Dangling-but-queryable**: records are never deleted. Once the host
//!    object is collected, identity lookups miss but historical lookups by
//!    id keep working.
//!
//! 3. **Address reuse is a miss**: an identity entry whose `Weak` is dead
//!    is treated as absent and replaced on the next registration at that
//!    address, so a recycled allocation can never alias an old record.
//!
//! 4. **No operation raises**: misses return `None`; teardown and archival
//!    are idempotent; the archive is bounded by eviction, not by errors.
//!
//! Every mutation is published on the event bus. Emission appends are
//! represented by their own emission events rather than a subscription
//! update, keeping per-element cost at one event.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use streamscope_core::traits::identity_key;
use streamscope_core::{
    record_payload, ArchiveConfig, CompositionRecord, EntityId, EventAction, IdKind, StreamOps,
    StreamRecord, SubscriptionRecord, TransformApplication, TransformFactoryRecord,
};
use streamscope_events::EventBus;

struct IdentityEntry {
    weak: Weak<dyn StreamOps>,
    slot: usize,
}

#[derive(Default)]
struct StoreInner {
    /// Dense arena of stream records, registration order
    streams: Vec<StreamRecord>,
    /// Stream id -> arena slot
    stream_index: FxHashMap<EntityId, usize>,
    /// Host-object address -> arena slot, weakly held
    identity: FxHashMap<usize, IdentityEntry>,
    /// Active subscriptions
    active: FxHashMap<EntityId, SubscriptionRecord>,
    /// Stream id -> active subscription ids
    active_by_stream: FxHashMap<EntityId, FxHashSet<EntityId>>,
    /// Archived subscriptions, oldest first
    archive: VecDeque<SubscriptionRecord>,
    /// Ids present in the archive
    archive_index: FxHashSet<EntityId>,
    compositions: FxHashMap<EntityId, CompositionRecord>,
    applications: FxHashMap<EntityId, TransformApplication>,
    factories: FxHashMap<EntityId, TransformFactoryRecord>,
}

/// Memory-safe mapping from live host objects to metadata records, with
/// reverse lookup by id and archival of retired subscriptions.
pub struct EntityStore {
    bus: EventBus,
    inner: Mutex<StoreInner>,
}

impl EntityStore {
    /// Create an empty store publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    // ---- stream registration ----

    /// Register a host object under `record`, idempotent on first sight.
    ///
    /// If the object is already registered the existing record is returned
    /// unchanged and `record` is discarded.
    pub fn register_stream(
        &self,
        obj: &Arc<dyn StreamOps>,
        record: StreamRecord,
    ) -> StreamRecord {
        let key = identity_key(obj);
        let mut inner = self.inner.lock();
        if let Some(existing) = live_slot(&mut inner, key) {
            return inner.streams[existing].clone();
        }
        let slot = inner.streams.len();
        inner.stream_index.insert(record.id, slot);
        inner.identity.insert(
            key,
            IdentityEntry {
                weak: Arc::downgrade(obj),
                slot,
            },
        );
        inner.streams.push(record.clone());
        drop(inner);
        tracing::trace!(target: "streamscope", id = %record.id, "stream registered");
        self.bus.publish(
            IdKind::Stream,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
        record
    }

    /// Record for a live registered object, if any.
    pub fn get_stream(&self, obj: &Arc<dyn StreamOps>) -> Option<StreamRecord> {
        let key = identity_key(obj);
        let mut inner = self.inner.lock();
        live_slot(&mut inner, key).map(|slot| inner.streams[slot].clone())
    }

    /// Record for a live registered object, creating one lazily when the
    /// shims could not intercept construction.
    ///
    /// The record built by `make` captures whatever context exists at this
    /// later call, which is necessarily subscribe-time; that approximation
    /// is intended, not a defect.
    pub fn ensure_registered(
        &self,
        obj: &Arc<dyn StreamOps>,
        make: impl FnOnce() -> StreamRecord,
    ) -> StreamRecord {
        if let Some(existing) = self.get_stream(obj) {
            return existing;
        }
        self.register_stream(obj, make())
    }

    /// Historical lookup by id; works after the host object is collected.
    pub fn stream(&self, id: EntityId) -> Option<StreamRecord> {
        let inner = self.inner.lock();
        inner
            .stream_index
            .get(&id)
            .map(|&slot| inner.streams[slot].clone())
    }

    /// Amend a stream record in place, publishing an update.
    ///
    /// Used at composition time, because construction and composition
    /// calls interleave and parent/operator info may arrive late.
    pub fn amend_stream(
        &self,
        id: EntityId,
        amend: impl FnOnce(&mut StreamRecord),
    ) -> Option<StreamRecord> {
        let updated = {
            let mut inner = self.inner.lock();
            let slot = *inner.stream_index.get(&id)?;
            let record = &mut inner.streams[slot];
            amend(record);
            record.clone()
        };
        self.bus.publish(
            IdKind::Stream,
            id,
            EventAction::Updated,
            record_payload(&updated),
        );
        Some(updated)
    }

    /// Number of stream records, live or dangling.
    pub fn stream_count(&self) -> usize {
        self.inner.lock().streams.len()
    }

    // ---- subscriptions ----

    /// Register a new active subscription, linking it to its parent.
    pub fn register_subscription(&self, record: SubscriptionRecord) {
        let parent_update = {
            let mut inner = self.inner.lock();
            inner
                .active_by_stream
                .entry(record.stream_id)
                .or_default()
                .insert(record.id);
            let parent_update = record.parent_id.and_then(|parent| {
                inner.active.get_mut(&parent).map(|parent_record| {
                    parent_record.children.push(record.id);
                    parent_record.clone()
                })
            });
            inner.active.insert(record.id, record.clone());
            parent_update
        };
        self.bus.publish(
            IdKind::Subscription,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
        if let Some(parent_record) = parent_update {
            self.bus.publish(
                IdKind::Subscription,
                parent_record.id,
                EventAction::Updated,
                record_payload(&parent_record),
            );
        }
    }

    /// Move a subscription from active to archived, stamping `closed_at`.
    ///
    /// Idempotent: archiving an archived or unknown id is a no-op.
    /// Returns true only when the call did the archiving.
    pub fn archive_subscription(&self, id: EntityId, now: i64) -> bool {
        let archived = {
            let mut inner = self.inner.lock();
            if inner.archive_index.contains(&id) {
                return false;
            }
            let Some(mut record) = inner.active.remove(&id) else {
                return false;
            };
            record.closed_at = Some(now);
            if let Some(set) = inner.active_by_stream.get_mut(&record.stream_id) {
                set.remove(&id);
            }
            inner.archive_index.insert(id);
            inner.archive.push_back(record.clone());
            record
        };
        self.bus.publish(
            IdKind::Subscription,
            id,
            EventAction::Updated,
            record_payload(&archived),
        );
        true
    }

    /// Append an emission or error id to an active subscription.
    ///
    /// Returns false when the subscription is archived or unknown; an
    /// archived record is immutable except for its close timestamp.
    pub fn append_emission(&self, id: EntityId, event_id: EntityId, is_error: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.get_mut(&id) {
            Some(record) => {
                if is_error {
                    record.error_ids.push(event_id);
                } else {
                    record.emission_ids.push(event_id);
                }
                true
            }
            None => false,
        }
    }

    /// Subscription record by id, active or archived.
    pub fn subscription(&self, id: EntityId) -> Option<SubscriptionRecord> {
        let inner = self.inner.lock();
        inner.active.get(&id).cloned().or_else(|| {
            inner
                .archive
                .iter()
                .find(|record| record.id == id)
                .cloned()
        })
    }

    /// Ids of subscriptions currently consuming `stream_id`.
    pub fn active_for(&self, stream_id: EntityId) -> Vec<EntityId> {
        let inner = self.inner.lock();
        let mut ids: Vec<EntityId> = inner
            .active_by_stream
            .get(&stream_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of archived subscriptions currently retained.
    pub fn archived_count(&self) -> usize {
        self.inner.lock().archive.len()
    }

    /// Evict archived subscriptions beyond the count cap or older than the
    /// age cap, oldest first. Returns how many were evicted.
    ///
    /// Growth between cleanup calls is unbounded on purpose; the archive
    /// only shrinks when asked.
    pub fn evict_archive(&self, config: &ArchiveConfig, now: i64) -> usize {
        let mut inner = self.inner.lock();
        let cutoff = now - config.max_age.as_millis() as i64;
        let mut evicted = 0;
        loop {
            let drop_front = match inner.archive.front() {
                None => false,
                Some(front) => {
                    inner.archive.len() > config.max_entries
                        || front.closed_at.unwrap_or(now) < cutoff
                }
            };
            if !drop_front {
                break;
            }
            if let Some(record) = inner.archive.pop_front() {
                inner.archive_index.remove(&record.id);
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::trace!(target: "streamscope", evicted, "archive eviction");
        }
        evicted
    }

    // ---- composition bookkeeping ----

    /// Record one compose call.
    pub fn record_composition(&self, record: CompositionRecord) {
        self.inner
            .lock()
            .compositions
            .insert(record.id, record.clone());
        self.bus.publish(
            IdKind::Composition,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
    }

    /// Record one transform application within a composition.
    pub fn record_application(&self, record: TransformApplication) {
        self.inner
            .lock()
            .applications
            .insert(record.id, record.clone());
        self.bus.publish(
            IdKind::Transform,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
    }

    /// Record one transform factory call.
    pub fn record_factory(&self, record: TransformFactoryRecord) {
        self.inner
            .lock()
            .factories
            .insert(record.id, record.clone());
        self.bus.publish(
            IdKind::TransformFactory,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
    }

    /// Composition record by id.
    pub fn composition(&self, id: EntityId) -> Option<CompositionRecord> {
        self.inner.lock().compositions.get(&id).cloned()
    }

    /// Transform application record by id.
    pub fn application(&self, id: EntityId) -> Option<TransformApplication> {
        self.inner.lock().applications.get(&id).cloned()
    }

    /// Transform factory record by id.
    pub fn factory(&self, id: EntityId) -> Option<TransformFactoryRecord> {
        self.inner.lock().factories.get(&id).cloned()
    }

    /// Test-only: drop all state.
    pub fn reset(&self) {
        *self.inner.lock() = StoreInner::default();
    }
}

/// Resolve an identity entry to its slot, dropping the entry when the host
/// object is gone so a recycled address cannot alias an old record.
fn live_slot(inner: &mut StoreInner, key: usize) -> Option<usize> {
    match inner.identity.get(&key) {
        Some(entry) if entry.weak.strong_count() > 0 => Some(entry.slot),
        Some(_) => {
            inner.identity.remove(&key);
            None
        }
        None => None,
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EntityStore")
            .field("streams", &inner.streams.len())
            .field("active_subscriptions", &inner.active.len())
            .field("archived", &inner.archive.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamscope_core::{now_millis, ObserverOps, SubscriptionOps};

    struct FakeStream;

    impl StreamOps for FakeStream {
        fn subscribe(&self, _observer: Arc<dyn ObserverOps>) -> Arc<dyn SubscriptionOps> {
            struct Noop;
            impl SubscriptionOps for Noop {
                fn unsubscribe(&self) {}
                fn is_closed(&self) -> bool {
                    false
                }
            }
            Arc::new(Noop)
        }
    }

    fn store() -> EntityStore {
        EntityStore::new(EventBus::new())
    }

    fn fake() -> Arc<dyn StreamOps> {
        Arc::new(FakeStream)
    }

    fn sid(n: u64) -> EntityId {
        EntityId::new(IdKind::Stream, n)
    }

    fn sub_id(n: u64) -> EntityId {
        EntityId::new(IdKind::Subscription, n)
    }

    fn sub(n: u64, stream: u64, parent: Option<u64>) -> SubscriptionRecord {
        SubscriptionRecord::new(sub_id(n), sid(stream), parent.map(sub_id))
    }

    #[test]
    fn test_register_is_idempotent_on_first_sight() {
        let store = store();
        let obj = fake();
        let first = store.register_stream(&obj, StreamRecord::new(sid(0), None));
        let second = store.register_stream(&obj, StreamRecord::new(sid(1), None));
        assert_eq!(first.id, second.id);
        assert_eq!(store.stream_count(), 1);
    }

    #[test]
    fn test_ensure_registered_returns_same_record() {
        let store = store();
        let obj = fake();
        let a = store.ensure_registered(&obj, || StreamRecord::new(sid(0), None));
        let b = store.ensure_registered(&obj, || StreamRecord::new(sid(1), None));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_collected_object_is_a_miss_but_record_survives() {
        let store = store();
        let obj = fake();
        store.register_stream(&obj, StreamRecord::new(sid(0), None));
        drop(obj);
        // Historical lookup still works.
        assert!(store.stream(sid(0)).is_some());
        // A new object (whatever its address) never aliases the old record.
        let recycled = fake();
        assert!(store.get_stream(&recycled).is_none());
        store.register_stream(&recycled, StreamRecord::new(sid(1), None));
        assert_eq!(store.get_stream(&recycled).unwrap().id, sid(1));
        assert_eq!(store.stream_count(), 2);
    }

    #[test]
    fn test_amend_stream_publishes_update() {
        let bus = EventBus::new();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        bus.subscribe(move |event| {
            if matches!(event.action, EventAction::Updated) {
                sink.lock().push(event.id);
            }
        });
        let store = EntityStore::new(bus);
        let obj = fake();
        store.register_stream(&obj, StreamRecord::new(sid(0), None));
        let updated = store
            .amend_stream(sid(0), |record| record.path = "2".to_string())
            .unwrap();
        assert_eq!(updated.path, "2");
        assert_eq!(*updates.lock(), vec![sid(0)]);
        assert!(store.amend_stream(sid(9), |_| {}).is_none());
    }

    #[test]
    fn test_subscription_lifecycle_and_idempotent_archive() {
        let store = store();
        store.register_subscription(sub(0, 0, None));
        assert_eq!(store.active_for(sid(0)), vec![sub_id(0)]);

        assert!(store.archive_subscription(sub_id(0), now_millis()));
        // Second teardown is a no-op.
        assert!(!store.archive_subscription(sub_id(0), now_millis()));
        assert_eq!(store.archived_count(), 1);
        assert!(store.active_for(sid(0)).is_empty());
        // Still queryable, with a close stamp.
        assert!(store.subscription(sub_id(0)).unwrap().is_closed());
    }

    #[test]
    fn test_archive_unknown_id_is_noop() {
        let store = store();
        assert!(!store.archive_subscription(sub_id(7), now_millis()));
    }

    #[test]
    fn test_parent_child_linking() {
        let store = store();
        store.register_subscription(sub(0, 0, None));
        store.register_subscription(sub(1, 1, Some(0)));
        let parent = store.subscription(sub_id(0)).unwrap();
        assert_eq!(parent.children, vec![sub_id(1)]);
    }

    #[test]
    fn test_emission_append_only_while_active() {
        let store = store();
        store.register_subscription(sub(0, 0, None));
        let em = EntityId::new(IdKind::Emission, 0);
        let err = EntityId::new(IdKind::ErrorEvent, 0);
        assert!(store.append_emission(sub_id(0), em, false));
        assert!(store.append_emission(sub_id(0), err, true));
        store.archive_subscription(sub_id(0), now_millis());
        assert!(!store.append_emission(sub_id(0), EntityId::new(IdKind::Emission, 1), false));

        let record = store.subscription(sub_id(0)).unwrap();
        assert_eq!(record.emission_ids, vec![em]);
        assert_eq!(record.error_ids, vec![err]);
    }

    #[test]
    fn test_archive_grows_unbounded_until_evicted() {
        let store = store();
        let config = ArchiveConfig::default().with_max_entries(1_000);
        let now = now_millis();
        for n in 0..1_100 {
            store.register_subscription(sub(n, 0, None));
            store.archive_subscription(sub_id(n), now);
        }
        assert_eq!(store.archived_count(), 1_100);

        let evicted = store.evict_archive(&config, now);
        assert_eq!(evicted, 100);
        assert_eq!(store.archived_count(), 1_000);
        // Oldest went first.
        assert!(store.subscription(sub_id(0)).is_none());
        assert!(store.subscription(sub_id(100)).is_some());
    }

    #[test]
    fn test_archive_age_eviction() {
        let store = store();
        let config = ArchiveConfig::default()
            .with_max_entries(1_000)
            .with_max_age(Duration::from_secs(60));
        let now = now_millis();
        store.register_subscription(sub(0, 0, None));
        store.archive_subscription(sub_id(0), now - 120_000);
        store.register_subscription(sub(1, 0, None));
        store.archive_subscription(sub_id(1), now);

        assert_eq!(store.evict_archive(&config, now), 1);
        assert!(store.subscription(sub_id(0)).is_none());
        assert!(store.subscription(sub_id(1)).is_some());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Whatever the archive held before, one eviction pass leaves
            /// at most `max_entries` records and nothing older than the
            /// age cutoff, and it always removes from the oldest end.
            #[test]
            fn eviction_enforces_both_caps(
                total in 0usize..300,
                cap in 1usize..200,
                max_age_ms in 1_000i64..100_000,
            ) {
                let store = store();
                let now = now_millis();
                for n in 0..total {
                    store.register_subscription(sub(n as u64, 0, None));
                    // Spread close stamps into the past, newest last.
                    let closed = now - ((total - n) as i64) * 700;
                    store.archive_subscription(sub_id(n as u64), closed);
                }
                let config = ArchiveConfig::default()
                    .with_max_entries(cap)
                    .with_max_age(Duration::from_millis(max_age_ms as u64));

                store.evict_archive(&config, now);

                prop_assert!(store.archived_count() <= cap);
                let cutoff = now - max_age_ms;
                for n in 0..total {
                    if let Some(record) = store.subscription(sub_id(n as u64)) {
                        prop_assert!(record.closed_at.unwrap() >= cutoff);
                    }
                }
            }
        }
    }

    #[test]
    fn test_composition_bookkeeping_round_trip() {
        let store = store();
        let comp_id = EntityId::new(IdKind::Composition, 0);
        store.record_composition(CompositionRecord {
            id: comp_id,
            source_id: sid(0),
            result_id: sid(1),
            group_id: comp_id,
        });
        store.record_factory(TransformFactoryRecord {
            id: EntityId::new(IdKind::TransformFactory, 0),
            name: "map".to_string(),
            instance_id: EntityId::new(IdKind::Transform, 0),
        });
        store.record_application(TransformApplication {
            id: EntityId::new(IdKind::Transform, 0),
            index: 0,
            source_id: sid(0),
            target_id: sid(1),
            factory_id: EntityId::new(IdKind::TransformFactory, 0),
        });
        assert_eq!(store.composition(comp_id).unwrap().result_id, sid(1));
        assert_eq!(
            store
                .factory(EntityId::new(IdKind::TransformFactory, 0))
                .unwrap()
                .name,
            "map"
        );
        assert_eq!(
            store
                .application(EntityId::new(IdKind::Transform, 0))
                .unwrap()
                .index,
            0
        );
    }

    #[test]
    fn test_mutations_publish_in_order() {
        let bus = EventBus::new();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        bus.subscribe(move |event| sink.lock().push((event.seq, event.kind)));
        let store = EntityStore::new(bus);

        let obj = fake();
        store.register_stream(&obj, StreamRecord::new(sid(0), None));
        store.register_subscription(sub(0, 0, None));
        store.archive_subscription(sub_id(0), now_millis());

        let seen = kinds.lock();
        assert_eq!(
            *seen,
            vec![
                (0, IdKind::Stream),
                (1, IdKind::Subscription),
                (2, IdKind::Subscription),
            ]
        );
    }
}
