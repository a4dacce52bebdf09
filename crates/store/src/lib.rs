//! Entity store and relationship indexer for streamscope
//!
//! Two pieces live here:
//! - [`EntityStore`]: memory-safe mapping from live host objects to
//!   metadata records, reverse lookup by id, and archival of retired
//!   subscriptions with bounded, oldest-first eviction.
//! - [`RelationshipIndexer`]: combinator-argument relationships with a
//!   reverse index for "what depends on this stream" queries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod relation;

pub use entity::EntityStore;
pub use relation::{
    scan_arguments, ArgumentScan, ArgumentValue, DetectedFunction, DetectedStream,
    RelationshipIndexer,
};
