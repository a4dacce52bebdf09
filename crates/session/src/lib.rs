//! Module sessions and stable wrappers for streamscope
//!
//! The reload-survival subsystem: per-module wrapper tables that persist
//! across live code reloads, mapping structural keys to long-lived
//! indirection handles whose internal target is swapped at the start of
//! every session reusing the key.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod wrapper;

pub use registry::{ModuleRegistry, ModuleSession};
pub use wrapper::StableWrapper;
