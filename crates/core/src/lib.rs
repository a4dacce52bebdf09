//! Core types and traits for streamscope
//!
//! This crate defines the foundational pieces used throughout the system:
//! - EntityId / IdKind / IdAllocator: monotonic per-kind identifiers
//! - Record types: one serde-serializable record per tracked entity
//! - TrackingEvent: the ordered event-channel tuple
//! - Capability traits: StreamOps / ObserverOps / SubscriptionOps
//! - Diagnostic / DiagnosticLog: the fail-open defect channel
//! - TrackerConfig / ArchiveConfig: configuration
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod diag;
pub mod error;
pub mod event;
pub mod ids;
pub mod records;
pub mod traits;

pub use config::{ArchiveConfig, DiagnosticsCap, TrackerConfig};
pub use diag::{shared_diagnostics, Diagnostic, DiagnosticLog, SharedDiagnostics, StackKind};
pub use error::{Error, Result};
pub use event::{record_payload, EventAction, TrackingEvent};
pub use ids::{EntityId, IdAllocator, IdKind, SharedAllocator};
pub use records::{
    now_millis, ArgumentBinding, ArgumentInvocation, ArgumentRef, CompositionRecord,
    DynamicOrigin, LifecycleEvent, ModuleSessionRecord, RelationshipRecord, SourceLocation,
    StableWrapperRecord, StreamRecord, SubscriptionRecord, TransformApplication,
    TransformFactoryRecord,
};
pub use traits::{identity_key, ObserverOps, StreamOps, SubscriptionOps};
