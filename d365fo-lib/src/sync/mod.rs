//! Metadata sync sessions

mod manager;
mod session;

pub use manager::*;
pub use session::*;

use serde::Deserialize;
use serde::Serialize;

/// How a sync populates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Fetch everything from the remote.
    Full,
    /// Declared for API stability; currently executes the same phase list
    /// as [`Full`](Self::Full).
    Incremental,
    /// Fetch only the data entity catalog.
    EntitiesOnly,
    /// Copy rows from a compatible, already-synced global version instead of
    /// fetching from the remote.
    SharingMode,
}

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Created, background execution not started yet.
    Pending,
    /// Background execution in progress.
    Running,
    /// All phases finished (optional phases may have failed).
    Completed,
    /// A required phase failed.
    Failed,
    /// Cancelled at a phase boundary.
    Cancelled,
}

impl SyncStatus {
    /// Returns `true` for `Completed`, `Failed`, and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Phases a sync session executes, strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Session setup.
    Initializing,
    /// Record the sync start on the environment-version link.
    VersionCheck,
    /// Data entity catalog fetch.
    Entities,
    /// Public entity schema fetch (reused as the copy phase in sharing mode).
    Schemas,
    /// Enumeration fetch.
    Enumerations,
    /// Label resolution for everything stored so far.
    Labels,
    /// Search index rebuild.
    Indexing,
    /// Completion bookkeeping.
    Finalizing,
}

impl SyncPhase {
    /// Returns the display name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::VersionCheck => "Version Check",
            Self::Entities => "Entities",
            Self::Schemas => "Schemas",
            Self::Enumerations => "Enumerations",
            Self::Labels => "Labels",
            Self::Indexing => "Indexing",
            Self::Finalizing => "Finalizing",
        }
    }

    /// Required phases fail the whole session; optional phases log and
    /// continue with partial counts.
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::VersionCheck | Self::Entities | Self::Finalizing
        )
    }

    /// Returns the phase list a strategy executes, in order.
    pub fn phases_for(strategy: SyncStrategy) -> &'static [SyncPhase] {
        match strategy {
            SyncStrategy::Full | SyncStrategy::Incremental => &[
                Self::Initializing,
                Self::VersionCheck,
                Self::Entities,
                Self::Schemas,
                Self::Enumerations,
                Self::Labels,
                Self::Indexing,
                Self::Finalizing,
            ],
            SyncStrategy::EntitiesOnly => &[
                Self::Initializing,
                Self::VersionCheck,
                Self::Entities,
                Self::Finalizing,
            ],
            SyncStrategy::SharingMode => &[
                Self::Initializing,
                Self::VersionCheck,
                Self::Schemas,
                Self::Finalizing,
            ],
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_lists_per_strategy() {
        assert_eq!(SyncPhase::phases_for(SyncStrategy::Full).len(), 8);
        assert_eq!(
            SyncPhase::phases_for(SyncStrategy::Incremental),
            SyncPhase::phases_for(SyncStrategy::Full)
        );
        assert_eq!(
            SyncPhase::phases_for(SyncStrategy::EntitiesOnly),
            &[
                SyncPhase::Initializing,
                SyncPhase::VersionCheck,
                SyncPhase::Entities,
                SyncPhase::Finalizing
            ]
        );
        assert_eq!(
            SyncPhase::phases_for(SyncStrategy::SharingMode),
            &[
                SyncPhase::Initializing,
                SyncPhase::VersionCheck,
                SyncPhase::Schemas,
                SyncPhase::Finalizing
            ]
        );
    }

    #[test]
    fn test_required_classification() {
        assert!(SyncPhase::Entities.is_required());
        assert!(!SyncPhase::Enumerations.is_required());
        assert!(!SyncPhase::Labels.is_required());
        assert!(!SyncPhase::Indexing.is_required());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SyncStatus::Pending.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
    }
}
