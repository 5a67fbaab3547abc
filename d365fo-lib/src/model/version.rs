//! Environment and version types

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// An installed module with its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersionInfo {
    /// Module identifier.
    pub module_id: String,
    /// Module name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Publisher.
    pub publisher: String,
    /// Display name.
    pub display_name: String,
}

/// A deduplicated metadata snapshot keyed by the set of installed modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVersionInfo {
    /// Row identifier.
    pub id: i64,
    /// Canonical hash of the sorted module list.
    pub version_hash: String,
    /// Application version string, when detected.
    pub application_version: Option<String>,
    /// Platform version string, when detected.
    pub platform_version: Option<String>,
    /// Application build version string, when detected.
    pub application_build_version: Option<String>,
    /// Installed modules, sorted by module ID.
    pub modules: Vec<ModuleVersionInfo>,
    /// Number of environments currently linked to this version.
    pub reference_count: i64,
    /// When this version was first observed.
    pub first_seen_at: DateTime<Utc>,
    /// When this version was last observed.
    pub last_seen_at: DateTime<Utc>,
}

/// Sync status of an environment-version link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSyncStatus {
    /// No sync attempted yet.
    Pending,
    /// A sync is in progress.
    Syncing,
    /// The last sync completed.
    Completed,
    /// The last sync failed.
    Failed,
}

impl VersionSyncStatus {
    /// Returns the storage name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its storage name; unknown names fall back to `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "syncing" => Self::Syncing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// The current version link of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVersionInfo {
    /// The environment.
    pub environment_id: i64,
    /// The linked global version.
    pub global_version_id: i64,
    /// Status of the most recent sync for this link.
    pub last_sync_status: VersionSyncStatus,
    /// Duration of the most recent sync, when recorded.
    pub last_sync_duration_ms: Option<i64>,
    /// When the link was established.
    pub linked_at: DateTime<Utc>,
}

/// Result of probing an environment's version actions and module inventory.
#[derive(Debug, Clone, Default)]
pub struct VersionDetectionResult {
    /// `GetApplicationVersion` result.
    pub application_version: Option<String>,
    /// `GetPlatformBuildVersion` result.
    pub platform_build_version: Option<String>,
    /// `GetApplicationBuildVersion` result.
    pub application_build_version: Option<String>,
    /// Installed modules; empty when inventory retrieval failed.
    pub modules: Vec<ModuleVersionInfo>,
}

/// Record counts written when a sync completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Data entities stored.
    pub entity_count: i64,
    /// Actions stored.
    pub action_count: i64,
    /// Enumerations stored.
    pub enumeration_count: i64,
    /// Labels stored.
    pub label_count: i64,
}
