//! Sync session state.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::SyncPhase;
use super::SyncStatus;
use super::SyncStrategy;

/// Outcome of a finished sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Whether the session completed.
    pub success: bool,
    /// Failure description, when not successful.
    pub error: Option<String>,
    /// Wall-clock duration.
    pub duration_ms: i64,
    /// Data entities stored.
    pub entity_count: i64,
    /// Actions stored.
    pub action_count: i64,
    /// Enumerations stored.
    pub enumeration_count: i64,
    /// Labels stored.
    pub label_count: i64,
}

/// Progress of a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncActivity {
    /// Display name.
    pub name: String,
    /// Phase status.
    pub status: SyncStatus,
    /// Items processed so far.
    pub items_processed: usize,
    /// Total items, when known.
    pub items_total: Option<usize>,
    /// Phase progress in percent.
    pub progress_percent: f64,
    /// Description of the item currently in flight.
    pub current_item: Option<String>,
    /// When the phase started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the phase ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Failure description, when the phase failed.
    pub error: Option<String>,
}

impl SyncActivity {
    /// Creates a pending activity for a phase.
    pub fn pending(phase: SyncPhase) -> Self {
        Self {
            name: phase.as_str().to_string(),
            status: SyncStatus::Pending,
            items_processed: 0,
            items_total: None,
            progress_percent: 0.0,
            current_item: None,
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    /// Recomputes `progress_percent` from the item counters.
    pub fn update_progress(&mut self) {
        if let Some(total) = self.items_total {
            if total > 0 {
                self.progress_percent =
                    (self.items_processed as f64 / total as f64 * 100.0).min(100.0);
            }
        }
    }
}

/// A tracked, cancellable background run of the metadata synchronizer.
///
/// Observers receive snapshots of this struct; the manager owns the live
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    /// Session identifier.
    pub session_id: Uuid,
    /// Version being synced.
    pub global_version_id: i64,
    /// Strategy in use.
    pub strategy: SyncStrategy,
    /// Session status.
    pub status: SyncStatus,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    /// Overall progress: the unweighted average of the phase percentages.
    pub progress_percent: f64,
    /// Phase currently executing.
    pub current_phase: Option<SyncPhase>,
    /// Display name of the current activity.
    pub current_activity: Option<String>,
    /// Who initiated the session (user, system, mcp, …).
    pub initiated_by: String,
    /// Failure description, when the session failed.
    pub error: Option<String>,
    /// Final result, when the session finished.
    pub result: Option<SyncResult>,
    /// Per-phase activities, in execution order.
    pub phases: Vec<(SyncPhase, SyncActivity)>,
}

impl SyncSession {
    /// Creates a pending session with the strategy's phase list.
    pub fn new(global_version_id: i64, strategy: SyncStrategy, initiated_by: &str) -> Self {
        let phases = SyncPhase::phases_for(strategy)
            .iter()
            .map(|phase| (*phase, SyncActivity::pending(*phase)))
            .collect();

        Self {
            session_id: Uuid::new_v4(),
            global_version_id,
            strategy,
            status: SyncStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            progress_percent: 0.0,
            current_phase: None,
            current_activity: None,
            initiated_by: initiated_by.to_string(),
            error: None,
            result: None,
            phases,
        }
    }

    /// Returns a mutable reference to a phase's activity.
    pub fn phase_mut(&mut self, phase: SyncPhase) -> Option<&mut SyncActivity> {
        self.phases
            .iter_mut()
            .find(|(p, _)| *p == phase)
            .map(|(_, activity)| activity)
    }

    /// Returns a phase's activity.
    pub fn phase(&self, phase: SyncPhase) -> Option<&SyncActivity> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, activity)| activity)
    }

    /// Recomputes the session percentage as the unweighted average over the
    /// strategy's phase list.
    pub fn recompute_progress(&mut self) {
        if self.phases.is_empty() {
            return;
        }
        let sum: f64 = self
            .phases
            .iter()
            .map(|(_, activity)| activity.progress_percent)
            .sum();
        self.progress_percent = sum / self.phases.len() as f64;
    }

    /// Builds a summary snapshot for listings and history.
    pub fn summary(&self) -> SyncSessionSummary {
        let duration_seconds = match self.end_time {
            Some(end) => Some((end - self.start_time).num_seconds()),
            None => Some((Utc::now() - self.start_time).num_seconds()),
        };
        SyncSessionSummary {
            session_id: self.session_id,
            global_version_id: self.global_version_id,
            strategy: self.strategy,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            progress_percent: self.progress_percent,
            current_phase: self.current_phase,
            current_activity: self.current_activity.clone(),
            initiated_by: self.initiated_by.clone(),
            duration_seconds,
        }
    }
}

/// Compact view of a session for listings and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSessionSummary {
    /// Session identifier.
    pub session_id: Uuid,
    /// Version being synced.
    pub global_version_id: i64,
    /// Strategy in use.
    pub strategy: SyncStrategy,
    /// Session status.
    pub status: SyncStatus,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    /// Overall progress percentage.
    pub progress_percent: f64,
    /// Phase currently executing.
    pub current_phase: Option<SyncPhase>,
    /// Display name of the current activity.
    pub current_activity: Option<String>,
    /// Who initiated the session.
    pub initiated_by: String,
    /// Elapsed (or final) duration in seconds.
    pub duration_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_progress_is_unweighted_average() {
        let mut session = SyncSession::new(1, SyncStrategy::EntitiesOnly, "test");
        assert_eq!(session.phases.len(), 4);

        session
            .phase_mut(SyncPhase::Initializing)
            .unwrap()
            .progress_percent = 100.0;
        session
            .phase_mut(SyncPhase::VersionCheck)
            .unwrap()
            .progress_percent = 100.0;
        session.recompute_progress();
        assert_eq!(session.progress_percent, 50.0);
    }

    #[test]
    fn test_activity_progress_from_counters() {
        let mut activity = SyncActivity::pending(SyncPhase::Entities);
        activity.items_total = Some(200);
        activity.items_processed = 50;
        activity.update_progress();
        assert_eq!(activity.progress_percent, 25.0);
    }

    #[test]
    fn test_new_session_is_pending() {
        let session = SyncSession::new(7, SyncStrategy::Full, "user");
        assert_eq!(session.status, SyncStatus::Pending);
        assert_eq!(session.global_version_id, 7);
        assert_eq!(session.progress_percent, 0.0);
        assert!(session.phases.iter().all(|(_, a)| a.status == SyncStatus::Pending));
    }
}
