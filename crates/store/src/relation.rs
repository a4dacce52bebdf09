//! Relationship indexer
//!
//! Scans combinator arguments for tracked streams: positional arguments by
//! index, list arguments by element index, keyed arguments by property
//! name. One `RelationshipRecord` is built per call with at least one
//! detected stream argument; a reverse index answers "what depends on this
//! stream" in O(1) amortized time.
//!
//! Detection is a capability check: an argument is a stream iff the shim
//! handed it over as [`ArgumentValue::Stream`]. The indexer never inspects
//! arbitrary host values.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use streamscope_core::{
    record_payload, ArgumentBinding, ArgumentInvocation, EntityId, EventAction, IdKind,
    RelationshipRecord, StreamOps,
};
use streamscope_events::EventBus;

/// One combinator argument, as reported by a shim.
pub enum ArgumentValue {
    /// A tracked stream object
    Stream(Arc<dyn StreamOps>),
    /// An ordered list of arguments
    List(Vec<ArgumentValue>),
    /// Property-name-keyed arguments
    Keyed(Vec<(String, ArgumentValue)>),
    /// A function value, invocable later by the combinator
    Function {
        /// Name the shim reported, if any
        name: Option<String>,
    },
    /// Anything else; ignored by detection
    Opaque,
}

impl std::fmt::Debug for ArgumentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentValue::Stream(_) => f.write_str("Stream"),
            ArgumentValue::List(items) => f.debug_tuple("List").field(&items.len()).finish(),
            ArgumentValue::Keyed(items) => f.debug_tuple("Keyed").field(&items.len()).finish(),
            ArgumentValue::Function { name } => {
                f.debug_struct("Function").field("name", name).finish()
            }
            ArgumentValue::Opaque => f.write_str("Opaque"),
        }
    }
}

/// A stream argument found by a scan, with its path.
pub struct DetectedStream<'a> {
    /// Argument path (`"0"`, `"1.2"`, or a property name)
    pub path: String,
    /// The stream object at that path
    pub obj: &'a Arc<dyn StreamOps>,
}

/// A function argument found by a scan, with its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFunction {
    /// Argument path
    pub path: String,
    /// Reported function name, if any
    pub name: Option<String>,
}

/// Everything a scan detected.
#[derive(Default)]
pub struct ArgumentScan<'a> {
    /// Stream arguments, in path order of discovery
    pub streams: Vec<DetectedStream<'a>>,
    /// Function arguments, in path order of discovery
    pub functions: Vec<DetectedFunction>,
}

/// Scan a combinator argument list.
///
/// A container that is the sole argument is transparent: its element
/// indexes or property names become the paths directly, which is how a
/// single-array or single-object combinator call site reads. With several
/// arguments, container contents are prefixed by the argument index.
pub fn scan_arguments(args: &[ArgumentValue]) -> ArgumentScan<'_> {
    let mut scan = ArgumentScan::default();
    if let [only] = args {
        if matches!(only, ArgumentValue::List(_) | ArgumentValue::Keyed(_)) {
            walk(only, "", &mut scan);
            return scan;
        }
    }
    for (index, arg) in args.iter().enumerate() {
        walk(arg, &index.to_string(), &mut scan);
    }
    scan
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn walk<'a>(arg: &'a ArgumentValue, path: &str, scan: &mut ArgumentScan<'a>) {
    match arg {
        ArgumentValue::Stream(obj) => scan.streams.push(DetectedStream {
            path: path.to_string(),
            obj,
        }),
        ArgumentValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                walk(item, &join(path, &index.to_string()), scan);
            }
        }
        ArgumentValue::Keyed(items) => {
            for (key, item) in items {
                walk(item, &join(path, key), scan);
            }
        }
        ArgumentValue::Function { name } => scan.functions.push(DetectedFunction {
            path: path.to_string(),
            name: name.clone(),
        }),
        ArgumentValue::Opaque => {}
    }
}

#[derive(Default)]
struct RelInner {
    records: FxHashMap<EntityId, RelationshipRecord>,
    bindings: FxHashMap<EntityId, ArgumentBinding>,
    invocations: FxHashMap<EntityId, ArgumentInvocation>,
    /// Stream id -> relationship ids using it
    by_stream: FxHashMap<EntityId, FxHashSet<EntityId>>,
}

/// Records combinator-argument relationships with a reverse index.
///
/// Relationship records are immutable after creation.
pub struct RelationshipIndexer {
    bus: EventBus,
    inner: Mutex<RelInner>,
}

impl RelationshipIndexer {
    /// Create an empty indexer publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            inner: Mutex::new(RelInner::default()),
        }
    }

    /// Insert a relationship record and index its stream arguments.
    pub fn insert(&self, record: RelationshipRecord) {
        {
            let mut inner = self.inner.lock();
            for stream_id in record.arguments.values() {
                inner
                    .by_stream
                    .entry(*stream_id)
                    .or_default()
                    .insert(record.id);
            }
            inner.records.insert(record.id, record.clone());
        }
        self.bus.publish(
            IdKind::Relationship,
            record.id,
            EventAction::Created,
            record_payload(&record),
        );
    }

    /// Relationship record by id.
    pub fn relationship(&self, id: EntityId) -> Option<RelationshipRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    /// Ids of relationships with `stream_id` among their arguments.
    pub fn relationships_using(&self, stream_id: EntityId) -> Vec<EntityId> {
        let inner = self.inner.lock();
        let mut ids: Vec<EntityId> = inner
            .by_stream
            .get(&stream_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Insert an argument binding.
    pub fn insert_binding(&self, binding: ArgumentBinding) {
        self.inner
            .lock()
            .bindings
            .insert(binding.id, binding.clone());
        self.bus.publish(
            IdKind::Argument,
            binding.id,
            EventAction::Created,
            record_payload(&binding),
        );
    }

    /// Argument binding by id.
    pub fn binding(&self, id: EntityId) -> Option<ArgumentBinding> {
        self.inner.lock().bindings.get(&id).cloned()
    }

    /// Record an invocation of a function-valued argument.
    pub fn record_invocation(&self, invocation: ArgumentInvocation) {
        self.inner
            .lock()
            .invocations
            .insert(invocation.id, invocation.clone());
        self.bus.publish(
            IdKind::Invocation,
            invocation.id,
            EventAction::Created,
            record_payload(&invocation),
        );
    }

    /// Invocation record by id.
    pub fn invocation(&self, id: EntityId) -> Option<ArgumentInvocation> {
        self.inner.lock().invocations.get(&id).cloned()
    }

    /// Test-only: drop all state.
    pub fn reset(&self) {
        *self.inner.lock() = RelInner::default();
    }
}

impl std::fmt::Debug for RelationshipIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RelationshipIndexer")
            .field("relationships", &inner.records.len())
            .field("bindings", &inner.bindings.len())
            .field("indexed_streams", &inner.by_stream.len())
            .finish()
    }
}
