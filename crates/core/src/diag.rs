//! Diagnostics channel
//!
//! Instrumentation defects never surface to the application. They land
//! here instead: a bounded in-memory log of typed diagnostics, mirrored to
//! `tracing::warn!` so operators see them without polling.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Which context stack a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    /// The composition-context stack
    Composition,
    /// The transform-execution-context stack
    Transform,
    /// The subscription-context stack
    Subscription,
}

impl StackKind {
    /// Stable string form for log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            StackKind::Composition => "composition",
            StackKind::Transform => "transform",
            StackKind::Subscription => "subscription",
        }
    }
}

/// A recorded instrumentation defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A frame was released out of order or released twice
    StackImbalance {
        /// The affected stack
        stack: StackKind,
        /// What the release found
        detail: String,
    },
    /// A frame was still present when its owning scope ended
    DanglingFrames {
        /// The affected stack
        stack: StackKind,
        /// How many foreign frames were drained
        drained: usize,
    },
    /// The same structural key was resolved twice within one session
    DuplicateKey {
        /// Owning module
        module: String,
        /// The duplicated key
        key: String,
    },
}

/// Bounded in-memory diagnostic log, oldest-first eviction.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: VecDeque<Diagnostic>,
    cap: usize,
    dropped: u64,
}

impl DiagnosticLog {
    /// Create a log holding at most `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
            dropped: 0,
        }
    }

    /// Record a diagnostic, evicting the oldest entry if at capacity.
    pub fn push(&mut self, diag: Diagnostic) {
        tracing::warn!(target: "streamscope", diagnostic = ?diag, "instrumentation diagnostic");
        if self.entries.len() == self.cap {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(diag);
    }

    /// All retained diagnostics, oldest first.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.iter().cloned().collect()
    }

    /// Number of retained diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics evicted due to the capacity bound.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Test-only: clear all retained diagnostics.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared handle over one diagnostic log, cloned into every component.
pub type SharedDiagnostics = Arc<Mutex<DiagnosticLog>>;

/// Create a shared diagnostic log with the given capacity.
pub fn shared_diagnostics(cap: usize) -> SharedDiagnostics {
    Arc::new(Mutex::new(DiagnosticLog::new(cap)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read_back() {
        let mut log = DiagnosticLog::new(8);
        log.push(Diagnostic::DuplicateKey {
            module: "m".to_string(),
            key: "source".to_string(),
        });
        assert_eq!(log.len(), 1);
        assert!(matches!(
            log.entries()[0],
            Diagnostic::DuplicateKey { .. }
        ));
    }

    #[test]
    fn test_bounded_oldest_first() {
        let mut log = DiagnosticLog::new(2);
        for drained in 0..3 {
            log.push(Diagnostic::DanglingFrames {
                stack: StackKind::Transform,
                drained,
            });
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 1);
        // The drained=0 entry was evicted.
        assert!(matches!(
            log.entries()[0],
            Diagnostic::DanglingFrames { drained: 1, .. }
        ));
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let diag = Diagnostic::StackImbalance {
            stack: StackKind::Subscription,
            detail: "released twice".to_string(),
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["kind"], "stack_imbalance");
        assert_eq!(json["stack"], "subscription");
    }
}
