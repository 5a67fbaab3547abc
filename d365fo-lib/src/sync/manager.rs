//! Sync session lifecycle and background execution.
//!
//! Sessions run as background tasks; phases execute strictly sequentially
//! and report item-level progress to registered callbacks. Cancellation is
//! cooperative: phases observe the flag at item-batch boundaries and the
//! session abandons at the next phase boundary. A slow or panicking
//! callback never blocks or fails the producing task.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use super::SyncPhase;
use super::SyncResult;
use super::SyncSession;
use super::SyncSessionSummary;
use super::SyncStatus;
use super::SyncStrategy;
use crate::api::labels::LabelOperations;
use crate::api::metadata::MetadataApi;
use crate::cache::MetadataCache;
use crate::error::Error;
use crate::error::SyncError;
use crate::model::SyncCounts;
use crate::model::VersionSyncStatus;

/// Callback invoked with a session snapshot on every progress update.
pub type ProgressCallback = Arc<dyn Fn(&SyncSession) + Send + Sync>;

/// Handle returned by [`SyncSessionManager::add_progress_callback`],
/// used to remove the callback again.
pub type CallbackHandle = u64;

/// Progress callbacks fire every this many entities.
const ENTITY_NOTIFY_EVERY: usize = 10;

/// Progress callbacks fire every this many schemas.
const SCHEMA_NOTIFY_EVERY: usize = 5;

/// Terminal sessions kept in the in-memory history ring.
const DEFAULT_MAX_HISTORY: usize = 100;

/// Owns all sync sessions of one client facade.
///
/// Cheap to clone; observers receive snapshots, never live references.
#[derive(Clone)]
pub struct SyncSessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    cache: Arc<MetadataCache>,
    metadata_api: Arc<MetadataApi>,
    labels: Arc<LabelOperations>,
    language: String,
    max_history: usize,
    sessions: RwLock<HashMap<Uuid, SyncSession>>,
    history: RwLock<VecDeque<SyncSessionSummary>>,
    callbacks: RwLock<HashMap<Uuid, Vec<(CallbackHandle, ProgressCallback)>>>,
    cancel_tokens: RwLock<HashMap<Uuid, CancellationToken>>,
    next_callback_handle: std::sync::atomic::AtomicU64,
}

impl SyncSessionManager {
    /// Creates a manager over the given cache and API handles.
    pub fn new(
        cache: Arc<MetadataCache>,
        metadata_api: Arc<MetadataApi>,
        labels: Arc<LabelOperations>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                cache,
                metadata_api,
                labels,
                language: language.into(),
                max_history: DEFAULT_MAX_HISTORY,
                sessions: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                callbacks: RwLock::new(HashMap::new()),
                cancel_tokens: RwLock::new(HashMap::new()),
                next_callback_handle: std::sync::atomic::AtomicU64::new(1),
            }),
        }
    }

    /// Starts a new sync session as a background task and returns its ID.
    ///
    /// Refuses when a session for the same global version is already
    /// running.
    pub async fn start_sync_session(
        &self,
        global_version_id: i64,
        strategy: SyncStrategy,
        initiated_by: &str,
    ) -> Result<Uuid, Error> {
        {
            let sessions = self.inner.sessions.read().await;
            let running = sessions.values().any(|s| {
                s.global_version_id == global_version_id && s.status == SyncStatus::Running
            });
            if running {
                return Err(Error::Sync(SyncError::AlreadyRunning { global_version_id }));
            }
        }

        let session = SyncSession::new(global_version_id, strategy, initiated_by);
        let session_id = session.session_id;
        let token = CancellationToken::new();

        self.inner.sessions.write().await.insert(session_id, session);
        self.inner
            .cancel_tokens
            .write()
            .await
            .insert(session_id, token.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            execute_session(inner, session_id, token).await;
        });

        info!(%session_id, global_version_id, ?strategy, "started sync session");
        Ok(session_id)
    }

    /// Returns a snapshot of an active session.
    pub async fn get_sync_session(&self, session_id: Uuid) -> Option<SyncSession> {
        self.inner.sessions.read().await.get(&session_id).cloned()
    }

    /// Lists all active (non-archived) sessions.
    pub async fn get_active_sessions(&self) -> Vec<SyncSessionSummary> {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.summary())
            .collect()
    }

    /// Returns the most recent `limit` archived sessions.
    pub async fn get_session_history(&self, limit: usize) -> Vec<SyncSessionSummary> {
        let history = self.inner.history.read().await;
        history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Cancels a session that has not reached a terminal state.
    ///
    /// The background task abandons at the next phase boundary; partial
    /// cache writes are not rolled back. Returns `false` for unknown or
    /// terminal sessions.
    pub async fn cancel_sync_session(&self, session_id: Uuid) -> bool {
        let token = self
            .inner
            .cancel_tokens
            .read()
            .await
            .get(&session_id)
            .cloned();

        let mut cancelled = false;
        let snapshot = self
            .inner
            .update_session(session_id, |session| {
                if !session.status.is_terminal() {
                    session.status = SyncStatus::Cancelled;
                    session.end_time = Some(Utc::now());
                    session.error = Some("Cancelled by user".to_string());
                    cancelled = true;
                }
            })
            .await;

        if !cancelled {
            return false;
        }

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(snapshot) = snapshot {
            self.inner.notify(&snapshot).await;
        }
        self.inner.archive(session_id).await;
        info!(%session_id, "sync session cancelled");
        true
    }

    /// Registers a progress callback for a session.
    pub async fn add_progress_callback(
        &self,
        session_id: Uuid,
        callback: ProgressCallback,
    ) -> CallbackHandle {
        let handle = self
            .inner
            .next_callback_handle
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.inner
            .callbacks
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push((handle, callback));
        handle
    }

    /// Removes a previously registered progress callback.
    pub async fn remove_progress_callback(&self, session_id: Uuid, handle: CallbackHandle) {
        if let Some(callbacks) = self.inner.callbacks.write().await.get_mut(&session_id) {
            callbacks.retain(|(h, _)| *h != handle);
        }
    }

    /// Recommends a strategy for a target version: `Incremental` when
    /// complete metadata already exists for it, `SharingMode` when another
    /// exact-module-match version is complete, otherwise `Full`.
    pub async fn recommend_strategy(
        &self,
        global_version_id: i64,
    ) -> Result<SyncStrategy, Error> {
        if self.inner.cache.has_complete_metadata(global_version_id).await? {
            return Ok(SyncStrategy::Incremental);
        }

        let manager = self.inner.cache.version_manager();
        if let Some(info) = manager.get_global_version_info(global_version_id).await? {
            let compatible = manager.find_compatible_versions(&info.modules, true).await?;
            for candidate in compatible {
                if candidate.id != global_version_id
                    && self.inner.cache.has_complete_metadata(candidate.id).await?
                {
                    return Ok(SyncStrategy::SharingMode);
                }
            }
        }

        Ok(SyncStrategy::Full)
    }
}

impl ManagerInner {
    /// Applies a mutation to a session and returns a snapshot, or `None`
    /// when the session is no longer active.
    async fn update_session<F>(&self, session_id: Uuid, f: F) -> Option<SyncSession>
    where
        F: FnOnce(&mut SyncSession),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_id)?;
        f(session);
        session.recompute_progress();
        Some(session.clone())
    }

    /// Fans a snapshot out to the session's callbacks. Each callback's
    /// failure is isolated.
    async fn notify(&self, snapshot: &SyncSession) {
        let callbacks = self
            .callbacks
            .read()
            .await
            .get(&snapshot.session_id)
            .cloned()
            .unwrap_or_default();

        for (handle, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                warn!(session_id = %snapshot.session_id, handle, "progress callback panicked");
            }
        }
    }

    async fn archive(&self, session_id: Uuid) {
        let session = self.sessions.write().await.remove(&session_id);
        if let Some(session) = session {
            let mut history = self.history.write().await;
            history.push_back(session.summary());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
        self.callbacks.write().await.remove(&session_id);
        self.cancel_tokens.write().await.remove(&session_id);
    }

    async fn update_and_notify<F>(&self, session_id: Uuid, f: F)
    where
        F: FnOnce(&mut SyncSession),
    {
        if let Some(snapshot) = self.update_session(session_id, f).await {
            self.notify(&snapshot).await;
        }
    }

    async fn begin_phase(&self, session_id: Uuid, phase: SyncPhase) {
        self.update_and_notify(session_id, |session| {
            session.current_phase = Some(phase);
            session.current_activity = Some(phase.as_str().to_string());
            if let Some(activity) = session.phase_mut(phase) {
                activity.status = SyncStatus::Running;
                activity.start_time = Some(Utc::now());
            }
        })
        .await;
    }

    async fn complete_phase(&self, session_id: Uuid, phase: SyncPhase) {
        self.update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(phase) {
                activity.status = SyncStatus::Completed;
                activity.end_time = Some(Utc::now());
                activity.progress_percent = 100.0;
            }
        })
        .await;
    }

    async fn fail_phase(&self, session_id: Uuid, phase: SyncPhase, message: &str) {
        let message = message.to_string();
        self.update_and_notify(session_id, move |session| {
            if let Some(activity) = session.phase_mut(phase) {
                activity.status = SyncStatus::Failed;
                activity.end_time = Some(Utc::now());
                activity.error = Some(message);
            }
        })
        .await;
    }
}

async fn execute_session(inner: Arc<ManagerInner>, session_id: Uuid, token: CancellationToken) {
    let Some(start) = inner
        .update_session(session_id, |session| {
            session.status = SyncStatus::Running;
        })
        .await
    else {
        return;
    };
    inner.notify(&start).await;

    let global_version_id = start.global_version_id;
    let strategy = start.strategy;
    let started_at = start.start_time;
    let mut counts = SyncCounts::default();

    for phase in SyncPhase::phases_for(strategy) {
        if token.is_cancelled() {
            finish_cancelled(&inner, session_id).await;
            return;
        }

        inner.begin_phase(session_id, *phase).await;

        let duration_ms = (Utc::now() - started_at).num_milliseconds();
        let outcome = run_phase(
            &inner,
            session_id,
            *phase,
            strategy,
            global_version_id,
            &token,
            &mut counts,
            duration_ms,
        )
        .await;

        match outcome {
            Ok(()) => inner.complete_phase(session_id, *phase).await,
            Err(err) if phase.is_required() => {
                error!(%session_id, phase = %phase, error = %err, "required sync phase failed");
                inner.fail_phase(session_id, *phase, &err.to_string()).await;
                finish_failed(&inner, session_id, global_version_id, *phase, err).await;
                return;
            }
            Err(err) => {
                warn!(%session_id, phase = %phase, error = %err, "optional sync phase failed, continuing");
                inner.fail_phase(session_id, *phase, &err.to_string()).await;
            }
        }
    }

    if token.is_cancelled() {
        finish_cancelled(&inner, session_id).await;
        return;
    }

    let duration_ms = (Utc::now() - started_at).num_milliseconds();
    inner
        .update_and_notify(session_id, |session| {
            session.status = SyncStatus::Completed;
            session.end_time = Some(Utc::now());
            session.progress_percent = 100.0;
            session.result = Some(SyncResult {
                success: true,
                error: None,
                duration_ms,
                entity_count: counts.entity_count,
                action_count: counts.action_count,
                enumeration_count: counts.enumeration_count,
                label_count: counts.label_count,
            });
        })
        .await;
    info!(%session_id, global_version_id, duration_ms, "sync session completed");
    inner.archive(session_id).await;
}

async fn finish_cancelled(inner: &Arc<ManagerInner>, session_id: Uuid) {
    // cancel_sync_session already transitioned and archived the session;
    // this handles the background task observing the flag first.
    inner
        .update_and_notify(session_id, |session| {
            if !session.status.is_terminal() {
                session.status = SyncStatus::Cancelled;
                session.end_time = Some(Utc::now());
                session.error = Some("Cancelled by user".to_string());
            }
        })
        .await;
    inner.archive(session_id).await;
}

async fn finish_failed(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    phase: SyncPhase,
    err: Error,
) {
    let _ = inner
        .cache
        .version_manager()
        .update_sync_status(
            inner.cache.environment_id(),
            global_version_id,
            VersionSyncStatus::Failed,
            None,
        )
        .await;

    inner
        .update_and_notify(session_id, |session| {
            session.status = SyncStatus::Failed;
            session.end_time = Some(Utc::now());
            session.error = Some(format!("{} phase failed: {}", phase, err));
        })
        .await;
    inner.archive(session_id).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_phase(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    phase: SyncPhase,
    strategy: SyncStrategy,
    global_version_id: i64,
    token: &CancellationToken,
    counts: &mut SyncCounts,
    duration_ms: i64,
) -> Result<(), Error> {
    match phase {
        SyncPhase::Initializing => Ok(()),
        SyncPhase::VersionCheck => {
            inner
                .cache
                .version_manager()
                .update_sync_status(
                    inner.cache.environment_id(),
                    global_version_id,
                    VersionSyncStatus::Syncing,
                    None,
                )
                .await?;
            Ok(())
        }
        SyncPhase::Entities => {
            sync_entities(inner, session_id, global_version_id, token, counts).await
        }
        SyncPhase::Schemas => match strategy {
            SyncStrategy::SharingMode => {
                sync_sharing(inner, session_id, global_version_id, token, counts).await
            }
            _ => sync_schemas(inner, session_id, global_version_id, token, counts).await,
        },
        SyncPhase::Enumerations => {
            sync_enumerations(inner, session_id, global_version_id, counts).await
        }
        SyncPhase::Labels => sync_labels(inner, session_id, global_version_id, counts).await,
        SyncPhase::Indexing => {
            inner.cache.rebuild_search_index(global_version_id).await?;
            Ok(())
        }
        SyncPhase::Finalizing => {
            inner.cache.mark_sync_completed(global_version_id, *counts).await?;
            inner
                .cache
                .version_manager()
                .update_sync_status(
                    inner.cache.environment_id(),
                    global_version_id,
                    VersionSyncStatus::Completed,
                    Some(duration_ms),
                )
                .await?;
            Ok(())
        }
    }
}

async fn sync_entities(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    token: &CancellationToken,
    counts: &mut SyncCounts,
) -> Result<(), Error> {
    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Entities) {
                activity.current_item = Some("Fetching entity list".to_string());
            }
        })
        .await;

    let entities = inner.metadata_api.get_all_data_entities().await?;
    let total = entities.len();

    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Entities) {
                activity.items_total = Some(total);
            }
        })
        .await;

    inner.cache.clear_data_entities(global_version_id).await?;

    let mut processed = 0usize;
    for chunk in entities.chunks(ENTITY_NOTIFY_EVERY) {
        if token.is_cancelled() {
            break;
        }

        inner.cache.append_data_entities(global_version_id, chunk).await?;
        processed += chunk.len();

        let last_name = chunk.last().map(|e| e.name.clone());
        inner
            .update_and_notify(session_id, |session| {
                if let Some(activity) = session.phase_mut(SyncPhase::Entities) {
                    activity.items_processed = processed;
                    activity.current_item = last_name;
                    activity.update_progress();
                }
            })
            .await;
    }

    counts.entity_count = processed as i64;
    Ok(())
}

async fn sync_schemas(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    token: &CancellationToken,
    counts: &mut SyncCounts,
) -> Result<(), Error> {
    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                activity.current_item = Some("Fetching public entities".to_string());
            }
        })
        .await;

    let entities = inner.metadata_api.get_all_public_entities_with_details().await?;
    let total = entities.len();

    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                activity.items_total = Some(total);
            }
        })
        .await;

    let mut action_count = 0i64;
    for (index, entity) in entities.iter().enumerate() {
        if token.is_cancelled() {
            break;
        }

        inner
            .cache
            .store_public_entity_schema(global_version_id, entity)
            .await?;
        action_count += entity.actions.len() as i64;

        let processed = index + 1;
        if processed % SCHEMA_NOTIFY_EVERY == 0 || processed == total {
            let name = entity.name.clone();
            inner
                .update_and_notify(session_id, move |session| {
                    if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                        activity.items_processed = processed;
                        activity.current_item = Some(name);
                        activity.update_progress();
                    }
                })
                .await;
        }
    }

    counts.action_count = action_count;
    Ok(())
}

async fn sync_enumerations(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    counts: &mut SyncCounts,
) -> Result<(), Error> {
    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Enumerations) {
                activity.current_item = Some("Fetching enumerations".to_string());
            }
        })
        .await;

    let enumerations = inner
        .metadata_api
        .get_all_public_enumerations_with_details()
        .await?;
    let total = enumerations.len();

    inner.cache.store_enumerations(global_version_id, &enumerations).await?;
    counts.enumeration_count = total as i64;

    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Enumerations) {
                activity.items_total = Some(total);
                activity.items_processed = total;
                activity.update_progress();
            }
        })
        .await;
    Ok(())
}

async fn sync_labels(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    counts: &mut SyncCounts,
) -> Result<(), Error> {
    let label_ids = inner.cache.collect_label_ids(global_version_id).await?;
    let total = label_ids.len();

    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Labels) {
                activity.items_total = Some(total);
                activity.current_item = Some("Resolving labels".to_string());
            }
        })
        .await;

    let resolved = inner
        .labels
        .get_labels_batch(&label_ids, &inner.language)
        .await?;
    counts.label_count = resolved.len() as i64;

    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Labels) {
                activity.items_processed = total;
                activity.update_progress();
            }
        })
        .await;
    Ok(())
}

/// Sharing mode reuses the Schemas phase as the copy phase: rows come from a
/// compatible completed version via `INSERT…SELECT`, with no network
/// fetches. Falls back to an entity fetch when no such version exists.
async fn sync_sharing(
    inner: &Arc<ManagerInner>,
    session_id: Uuid,
    global_version_id: i64,
    token: &CancellationToken,
    counts: &mut SyncCounts,
) -> Result<(), Error> {
    inner
        .update_and_notify(session_id, |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                activity.current_item = Some("Looking for compatible versions".to_string());
            }
        })
        .await;

    let manager = inner.cache.version_manager();
    let info = manager
        .get_global_version_info(global_version_id)
        .await?
        .ok_or_else(|| {
            Error::Sync(SyncError::Failed {
                phase: SyncPhase::Schemas,
                cause: format!("global version {} not found", global_version_id),
            })
        })?;

    let compatible = manager.find_compatible_versions(&info.modules, true).await?;
    let mut source = None;
    for candidate in compatible {
        if candidate.id != global_version_id
            && inner.cache.has_complete_metadata(candidate.id).await?
        {
            source = Some(candidate.id);
            break;
        }
    }

    let Some(source_version_id) = source else {
        info!(global_version_id, "no compatible version to share from, fetching entities");
        return sync_entities(inner, session_id, global_version_id, token, counts).await;
    };

    inner
        .update_and_notify(session_id, move |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                activity.current_item =
                    Some(format!("Copying from version {}", source_version_id));
            }
        })
        .await;

    let copied = inner
        .cache
        .copy_version_metadata(source_version_id, global_version_id)
        .await?;
    *counts = copied;

    inner
        .update_and_notify(session_id, move |session| {
            if let Some(activity) = session.phase_mut(SyncPhase::Schemas) {
                activity.items_total = Some(copied.entity_count as usize);
                activity.items_processed = copied.entity_count as usize;
                activity.update_progress();
            }
        })
        .await;
    Ok(())
}
