//! Tracker configuration
//!
//! Plain structs with builder-style `with_*` methods. Defaults are safe for
//! long-running processes: the subscription archive is bounded by count and
//! age, the diagnostic log by count.

use std::time::Duration;

/// Bounds for the archived-subscription store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Maximum archived subscriptions retained after a cleanup pass
    pub max_entries: usize,
    /// Maximum age of an archived subscription after a cleanup pass
    pub max_age: Duration,
}

impl ArchiveConfig {
    /// Override the count cap.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Override the age cap.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_age: Duration::from_secs(10 * 60),
        }
    }
}

/// Top-level tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerConfig {
    /// Archive bounds
    pub archive: ArchiveConfig,
    /// Diagnostic log capacity
    pub diagnostics_cap: DiagnosticsCap,
}

/// Capacity of the diagnostic log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsCap(pub usize);

impl Default for DiagnosticsCap {
    fn default() -> Self {
        DiagnosticsCap(256)
    }
}

impl TrackerConfig {
    /// Override the archive bounds.
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    /// Override the diagnostic log capacity.
    pub fn with_diagnostics_cap(mut self, cap: usize) -> Self {
        self.diagnostics_cap = DiagnosticsCap(cap);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.archive.max_entries, 1_000);
        assert_eq!(config.archive.max_age, Duration::from_secs(600));
        assert_eq!(config.diagnostics_cap.0, 256);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TrackerConfig::default()
            .with_archive(
                ArchiveConfig::default()
                    .with_max_entries(10)
                    .with_max_age(Duration::from_secs(1)),
            )
            .with_diagnostics_cap(4);
        assert_eq!(config.archive.max_entries, 10);
        assert_eq!(config.archive.max_age, Duration::from_secs(1));
        assert_eq!(config.diagnostics_cap.0, 4);
    }
}
