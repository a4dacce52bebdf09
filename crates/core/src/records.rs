//! Record types for tracked entities
//!
//! One record per tracked entity, serde-serializable so the event channel
//! and the debugger UI can consume them as JSON. Records are bookkeeping
//! only: none of them hold a reference to the host object they describe,
//! so tracking never extends a host object's lifetime.

use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current timestamp in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle event that triggered a dynamic construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A delivered element
    Element,
    /// A delivered error
    Error,
    /// Completion of the source
    Completion,
}

/// Source position reported by the upstream code generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file
    pub file: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// Why a stream exists, when it was built as a side effect of a running
/// subscription rather than by static composition.
///
/// All fields are inherited from the transform-execution frame that was on
/// top of the stack at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicOrigin {
    /// Name of the transform whose callback built this stream
    pub transform_name: String,
    /// Transform instance id
    pub transform_instance: EntityId,
    /// Subscription whose processing triggered the construction
    pub trigger_subscription: Option<EntityId>,
    /// Stream whose event triggered the construction
    pub trigger_stream: Option<EntityId>,
    /// The triggering lifecycle event
    pub trigger_event: LifecycleEvent,
}

/// A tracked stream object.
///
/// Created when a constructor, combinator, or composition is intercepted.
/// Composition-related fields may be amended after creation because
/// construction and composition calls interleave. Never deleted: once the
/// host object is collected the record stays queryable by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Entity id
    pub id: EntityId,
    /// Creation time (epoch ms)
    pub created_at: i64,
    /// Call-site position, when the code generator provided one
    pub location: Option<SourceLocation>,
    /// Ordered transform names applied by the composition that produced
    /// this stream; empty until composition is observed
    pub operator_chain: SmallVec<[String; 4]>,
    /// Hierarchical path (`parent_path.k`, or `k` alone at the root)
    pub path: String,
    /// Composition-session id active at creation or amendment time
    pub composition_group: Option<EntityId>,
    /// Source stream of the composition that produced this stream
    pub composition_parent: Option<EntityId>,
    /// Set iff the stream was built at subscribe time
    pub dynamic_origin: Option<DynamicOrigin>,
}

impl StreamRecord {
    /// Build a fresh record with composition fields unset.
    pub fn new(id: EntityId, location: Option<SourceLocation>) -> Self {
        Self {
            id,
            created_at: now_millis(),
            location,
            operator_chain: SmallVec::new(),
            path: String::new(),
            composition_group: None,
            composition_parent: None,
            dynamic_origin: None,
        }
    }

    /// True when the stream was constructed as a subscription side effect.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic_origin.is_some()
    }
}

/// A subscription, active or archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Entity id
    pub id: EntityId,
    /// Stream being consumed
    pub stream_id: EntityId,
    /// Subscription one nesting level up, when subscribed from inside
    /// another subscription's synchronous extent
    pub parent_id: Option<EntityId>,
    /// Subscriptions opened inside this one's extent
    pub children: Vec<EntityId>,
    /// Open time (epoch ms)
    pub opened_at: i64,
    /// Close time (epoch ms); the only field mutable after archival
    pub closed_at: Option<i64>,
    /// Ids of delivered elements, in delivery order
    pub emission_ids: Vec<EntityId>,
    /// Ids of delivered errors, in delivery order
    pub error_ids: Vec<EntityId>,
}

impl SubscriptionRecord {
    /// Build a fresh active subscription record.
    pub fn new(id: EntityId, stream_id: EntityId, parent_id: Option<EntityId>) -> Self {
        Self {
            id,
            stream_id,
            parent_id,
            children: Vec::new(),
            opened_at: now_millis(),
            closed_at: None,
            emission_ids: Vec::new(),
            error_ids: Vec::new(),
        }
    }

    /// True once the subscription has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// One "compose N transforms onto a stream" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRecord {
    /// Entity id
    pub id: EntityId,
    /// Stream the transforms were composed onto
    pub source_id: EntityId,
    /// Stream the composition produced
    pub result_id: EntityId,
    /// Composition-session (group) id
    pub group_id: EntityId,
}

/// One transform application within a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformApplication {
    /// Entity id
    pub id: EntityId,
    /// Zero-based position within the composition
    pub index: usize,
    /// Input stream of this step
    pub source_id: EntityId,
    /// Output stream of this step
    pub target_id: EntityId,
    /// Factory that produced the transform
    pub factory_id: EntityId,
}

/// A transform factory call (`map(f)`, `switch_map(f)`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformFactoryRecord {
    /// Entity id
    pub id: EntityId,
    /// Operator name
    pub name: String,
    /// Instance id for this particular factory call
    pub instance_id: EntityId,
}

/// What a combinator argument referred to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgumentRef {
    /// A tracked stream
    Stream {
        /// Id of the referenced stream
        id: EntityId,
    },
    /// A function value, invocable later
    Function {
        /// Name the shim reported for the function, if any
        name: Option<String>,
    },
    /// Anything else; not tracked further
    Opaque,
}

/// A combinator argument worth remembering: owner, path, and what it was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentBinding {
    /// Entity id
    pub id: EntityId,
    /// Relationship (or transform instance) the argument belongs to
    pub owner_id: EntityId,
    /// Argument path (`"0"`, `"1.2"`, or a property name)
    pub path: String,
    /// The referenced value
    pub value: ArgumentRef,
}

/// One invocation of a function-valued argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInvocation {
    /// Entity id
    pub id: EntityId,
    /// The binding that was invoked
    pub binding_id: EntityId,
    /// Invocation time (epoch ms)
    pub invoked_at: i64,
}

/// A combinator call with at least one tracked stream argument.
///
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Entity id
    pub id: EntityId,
    /// Combinator name
    pub operator_name: String,
    /// Transform instance id allocated for this call
    pub instance_id: EntityId,
    /// Stream the combinator produced, when the shim reported one
    pub result_id: Option<EntityId>,
    /// Argument path -> detected stream id
    pub arguments: BTreeMap<String, EntityId>,
}

/// One bracketed execution pass of a module's top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSessionRecord {
    /// Entity id
    pub id: EntityId,
    /// Module identifier from the code generator
    pub module_id: String,
    /// 1-based pass number within this module's lifetime
    pub ordinal: u64,
    /// Random uid correlating events of this pass across resets
    pub session_uid: Uuid,
    /// Structural keys resolved during the pass, in resolution order
    pub keys: Vec<String>,
    /// Start time (epoch ms)
    pub started_at: i64,
    /// End time (epoch ms); `None` while the pass is open
    pub ended_at: Option<i64>,
}

/// A stable wrapper: long-lived indirection handle for one structural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableWrapperRecord {
    /// Entity id
    pub id: EntityId,
    /// Owning module
    pub module_id: String,
    /// Structural key
    pub key: String,
    /// Stream the wrapper currently delegates to
    pub target_id: Option<EntityId>,
    /// Set when the key was absent from the latest session
    pub orphaned: bool,
}
