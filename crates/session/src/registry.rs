//! Module sessions and the per-module wrapper table
//!
//! Across a live reload, call sites are assumed structurally stable, but
//! re-executing a module's top level produces brand-new backing objects
//! while application code still holds references from the previous
//! execution. The registry keeps one wrapper table per module for the
//! module's lifetime; each session pass resolves structural keys against
//! that table, reusing wrappers (reference identity preserved) and swapping
//! their targets to the freshly built objects.
//!
//! Event-bus publishes happen only after the relevant map guard is
//! released; a consumer callback may query the registry re-entrantly.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streamscope_core::diag::{Diagnostic, SharedDiagnostics};
use streamscope_core::{
    now_millis, record_payload, EntityId, Error, EventAction, IdKind, ModuleSessionRecord,
    Result, SharedAllocator, StableWrapperRecord, StreamOps,
};
use streamscope_events::EventBus;
use uuid::Uuid;

use crate::wrapper::StableWrapper;

#[derive(Default)]
struct ModuleTable {
    wrappers: HashMap<String, Arc<StableWrapper>>,
    /// Keys resolved by the previous completed session
    prev_keys: HashSet<String>,
    /// Completed + started passes for this module
    passes: u64,
}

/// Process-wide table of module wrapper tables and session history.
pub struct ModuleRegistry {
    alloc: SharedAllocator,
    bus: EventBus,
    diagnostics: SharedDiagnostics,
    modules: DashMap<String, ModuleTable>,
    wrapper_records: DashMap<EntityId, StableWrapperRecord>,
    session_records: DashMap<EntityId, ModuleSessionRecord>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new(alloc: SharedAllocator, bus: EventBus, diagnostics: SharedDiagnostics) -> Self {
        Self {
            alloc,
            bus,
            diagnostics,
            modules: DashMap::new(),
            wrapper_records: DashMap::new(),
            session_records: DashMap::new(),
        }
    }

    /// Begin one bracketed execution pass of `module_id`'s top level.
    pub fn start(self: &Arc<Self>, module_id: &str) -> ModuleSession {
        let ordinal = {
            let mut table = self.modules.entry(module_id.to_string()).or_default();
            table.passes += 1;
            table.passes
        };
        let record = ModuleSessionRecord {
            id: self.alloc.next(IdKind::Session),
            module_id: module_id.to_string(),
            ordinal,
            session_uid: Uuid::new_v4(),
            keys: Vec::new(),
            started_at: now_millis(),
            ended_at: None,
        };
        self.session_records.insert(record.id, record.clone());
        tracing::trace!(
            target: "streamscope",
            module = module_id,
            ordinal,
            "module session started"
        );
        self.bus.publish(
            IdKind::Session,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
        ModuleSession {
            registry: Arc::clone(self),
            module_id: module_id.to_string(),
            record_id: record.id,
            seen: parking_lot::Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    /// Wrapper currently stored for `(module_id, key)`, if any.
    pub fn wrapper(&self, module_id: &str, key: &str) -> Option<Arc<StableWrapper>> {
        self.modules
            .get(module_id)
            .and_then(|table| table.wrappers.get(key).cloned())
    }

    /// Wrapper record by id.
    pub fn wrapper_record(&self, id: EntityId) -> Option<StableWrapperRecord> {
        self.wrapper_records.get(&id).map(|r| r.clone())
    }

    /// Session record by id.
    pub fn session_record(&self, id: EntityId) -> Option<ModuleSessionRecord> {
        self.session_records.get(&id).map(|r| r.clone())
    }

    /// Keys whose wrappers are currently orphaned in `module_id`.
    pub fn orphaned(&self, module_id: &str) -> Vec<String> {
        let Some(table) = self.modules.get(module_id) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = table
            .wrappers
            .iter()
            .filter(|(_, wrapper)| {
                self.wrapper_records
                    .get(&wrapper.id())
                    .map(|record| record.orphaned)
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Test-only: drop all modules, wrappers, and session history.
    pub fn reset(&self) {
        self.modules.clear();
        self.wrapper_records.clear();
        self.session_records.clear();
    }

    fn install(
        &self,
        session: &ModuleSession,
        key: &str,
        target: Arc<dyn StreamOps>,
        target_id: Option<EntityId>,
    ) -> Result<Arc<StableWrapper>> {
        if session.ended.load(Ordering::SeqCst) {
            return Err(Error::SessionEnded {
                module: session.module_id.clone(),
            });
        }
        {
            let mut seen = session.seen.lock();
            if seen.iter().any(|k| k == key) {
                // Usually a non-deterministic call site; honor both
                // registrations, last write wins.
                self.diagnostics.lock().push(Diagnostic::DuplicateKey {
                    module: session.module_id.clone(),
                    key: key.to_string(),
                });
            } else {
                seen.push(key.to_string());
            }
        }

        let (wrapper, record, action) = {
            let mut table = self
                .modules
                .entry(session.module_id.clone())
                .or_default();
            match table.wrappers.get(key) {
                Some(existing) => {
                    existing.swap_target(target);
                    let record = StableWrapperRecord {
                        id: existing.id(),
                        module_id: session.module_id.clone(),
                        key: key.to_string(),
                        target_id,
                        orphaned: false,
                    };
                    (existing.clone(), record, EventAction::Updated)
                }
                None => {
                    let id = self.alloc.next(IdKind::Wrapper);
                    let wrapper = Arc::new(StableWrapper::new(
                        id,
                        session.module_id.clone(),
                        key.to_string(),
                        target,
                    ));
                    table.wrappers.insert(key.to_string(), wrapper.clone());
                    let record = StableWrapperRecord {
                        id,
                        module_id: session.module_id.clone(),
                        key: key.to_string(),
                        target_id,
                        orphaned: false,
                    };
                    (wrapper, record, EventAction::Created)
                }
            }
        };
        self.wrapper_records.insert(record.id, record.clone());
        self.bus
            .publish(IdKind::Wrapper, record.id, action, record_payload(&record));
        Ok(wrapper)
    }

    fn finish(&self, session: &ModuleSession) {
        let seen: Vec<String> = session.seen.lock().clone();
        let seen_set: HashSet<String> = seen.iter().cloned().collect();

        let orphan_ids: Vec<EntityId> = {
            let mut table = self
                .modules
                .entry(session.module_id.clone())
                .or_default();
            let orphan_ids = table
                .prev_keys
                .difference(&seen_set)
                .filter_map(|key| table.wrappers.get(key).map(|w| w.id()))
                .collect();
            table.prev_keys = seen_set;
            orphan_ids
        };

        let mut orphan_records = Vec::with_capacity(orphan_ids.len());
        for id in orphan_ids {
            if let Some(mut record) = self.wrapper_records.get_mut(&id) {
                record.orphaned = true;
                orphan_records.push(record.clone());
            }
        }
        for record in orphan_records {
            self.bus.publish(
                IdKind::Wrapper,
                record.id,
                EventAction::Updated,
                record_payload(&record),
            );
        }

        // The record can be missing only after a test-time reset raced the
        // open session; finalize quietly in that case.
        let session_record = self.session_records.get_mut(&session.record_id).map(|mut record| {
            record.keys = seen;
            record.ended_at = Some(now_millis());
            record.clone()
        });
        if let Some(record) = session_record {
            self.bus.publish(
                IdKind::Session,
                record.id,
                EventAction::Updated,
                record_payload(&record),
            );
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.len())
            .field("wrappers", &self.wrapper_records.len())
            .field("sessions", &self.session_records.len())
            .finish()
    }
}

/// One open execution pass of a module's top level.
///
/// Ends explicitly via [`ModuleSession::end`]; a session dropped while
/// still open ends itself the same way.
pub struct ModuleSession {
    registry: Arc<ModuleRegistry>,
    module_id: String,
    record_id: EntityId,
    seen: parking_lot::Mutex<Vec<String>>,
    ended: AtomicBool,
}

impl ModuleSession {
    /// The module this session belongs to.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Id of this pass's session record.
    pub fn record_id(&self) -> EntityId {
        self.record_id
    }

    /// Resolve `key` to its stable wrapper, installing `target` as the
    /// wrapper's new delegate.
    ///
    /// On the first sight of a key within the module's lifetime a new
    /// wrapper is created; afterwards the same wrapper is returned on
    /// every pass with only its internal target reassigned, so references
    /// held by application code stay valid.
    pub fn resolve(
        &self,
        key: &str,
        target: Arc<dyn StreamOps>,
        target_id: Option<EntityId>,
    ) -> Result<Arc<StableWrapper>> {
        self.registry.install(self, key, target, target_id)
    }

    /// Finalize the pass. Keys resolved in a prior session but absent from
    /// this one mark their wrappers orphaned. Idempotent.
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.finish(self);
    }
}

impl Drop for ModuleSession {
    fn drop(&mut self) {
        self.end();
    }
}

impl std::fmt::Debug for ModuleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSession")
            .field("module_id", &self.module_id)
            .field("record_id", &self.record_id)
            .field("ended", &self.ended.load(Ordering::SeqCst))
            .finish()
    }
}
