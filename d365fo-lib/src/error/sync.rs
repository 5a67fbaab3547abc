//! Sync session error types

use uuid::Uuid;

use crate::sync::SyncPhase;

/// Errors raised by the sync session manager.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A session for the same global version is already running.
    #[error("Sync already running for global version {global_version_id}")]
    AlreadyRunning {
        /// The global version whose sync is in flight.
        global_version_id: i64,
    },

    /// No session with the given ID exists.
    #[error("Sync session {session_id} not found")]
    SessionNotFound {
        /// The unknown session ID.
        session_id: Uuid,
    },

    /// The session was cancelled before completion.
    #[error("Sync cancelled")]
    Cancelled,

    /// A required phase failed.
    #[error("Sync failed in {phase} phase: {cause}")]
    Failed {
        /// The phase that failed.
        phase: SyncPhase,
        /// Description of the failure.
        cause: String,
    },
}
