//! Version-aware metadata cache.
//!
//! An embedded SQLite store shared by all components of one client facade.
//! All catalog tables are keyed by `global_version_id`, so environments with
//! identical module sets read the same rows. Reads on missing data return
//! absent, never an error.

mod entities;
mod enums;
mod labels;
mod schema;
mod search;
mod sharing;

pub use entities::DataEntityFilter;

use std::path::Path;

use async_sqlite::Client;
use async_sqlite::ClientBuilder;
use async_sqlite::JournalMode;
use async_sqlite::rusqlite;
use async_sqlite::rusqlite::OptionalExtension;
use chrono::Utc;
use tracing::info;

use crate::error::CacheError;
use crate::model::SyncCounts;
use crate::version::GlobalVersionManager;

/// File name of the metadata database inside the environment cache directory.
pub const METADATA_DB_FILE: &str = "metadata.db";

/// Version-aware metadata cache backed by SQLite.
///
/// The cache exclusively owns its store handle; the owning client facade
/// exclusively owns the cache.
pub struct MetadataCache {
    client: Client,
    base_url: String,
    environment_id: i64,
}

impl MetadataCache {
    /// Opens the cache under the given directory, creating the database and
    /// registering the environment on first contact.
    pub async fn open(cache_dir: impl AsRef<Path>, base_url: &str) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.as_ref();
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Unavailable {
            reason: format!("cannot create {}: {}", cache_dir.display(), e),
        })?;

        let client = ClientBuilder::new()
            .path(cache_dir.join(METADATA_DB_FILE))
            .journal_mode(JournalMode::Wal)
            .open()
            .await
            .map_err(|e| CacheError::Unavailable {
                reason: format!("cannot open metadata store: {}", e),
            })?;

        Self::init(client, base_url).await
    }

    /// Opens an in-memory cache. Useful for testing; data is lost on drop.
    pub async fn open_in_memory(base_url: &str) -> Result<Self, CacheError> {
        let client = ClientBuilder::new()
            .path(":memory:")
            .open()
            .await
            .map_err(|e| CacheError::Unavailable {
                reason: format!("cannot open metadata store: {}", e),
            })?;

        Self::init(client, base_url).await
    }

    async fn init(client: Client, base_url: &str) -> Result<Self, CacheError> {
        schema::init_schema(&client).await?;

        let environment_id = Self::get_or_create_environment(&client, base_url).await?;
        info!(environment_id, base_url, "metadata cache initialized");

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            environment_id,
        })
    }

    /// Environments are created lazily on first contact and never deleted.
    async fn get_or_create_environment(
        client: &Client,
        base_url: &str,
    ) -> Result<i64, CacheError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let id = client
            .conn_mut(move |conn| {
                let now = Utc::now().to_rfc3339();
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM environments WHERE base_url = ?1",
                        [&base_url],
                        |row| row.get(0),
                    )
                    .optional()?;

                match existing {
                    Some(id) => {
                        conn.execute(
                            "UPDATE environments SET last_seen = ?1 WHERE id = ?2",
                            rusqlite::params![now, id],
                        )?;
                        Ok(id)
                    }
                    None => {
                        conn.execute(
                            "INSERT INTO environments (base_url, created_at, last_seen)
                             VALUES (?1, ?2, ?2)",
                            rusqlite::params![base_url, now],
                        )?;
                        Ok(conn.last_insert_rowid())
                    }
                }
            })
            .await?;
        Ok(id)
    }

    /// Returns the environment this cache belongs to.
    pub fn environment_id(&self) -> i64 {
        self.environment_id
    }

    /// Registers an environment row for a base URL, creating it on first
    /// contact, and returns its ID.
    pub async fn register_environment(&self, base_url: &str) -> Result<i64, CacheError> {
        Self::get_or_create_environment(&self.client, base_url).await
    }

    /// Returns the environment base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a version manager sharing this cache's store.
    pub fn version_manager(&self) -> GlobalVersionManager {
        GlobalVersionManager::new(self.client.clone())
    }

    pub(crate) fn store(&self) -> &Client {
        &self.client
    }

    /// Returns the global version currently linked to this environment.
    pub async fn current_global_version_id(&self) -> Result<Option<i64>, CacheError> {
        let info = self
            .version_manager()
            .get_environment_version_info(self.environment_id)
            .await?;
        Ok(info.map(|v| v.global_version_id))
    }

    /// Returns `true` when a completed sync exists for the version and the
    /// version actually has data entity rows.
    pub async fn has_complete_metadata(&self, global_version_id: i64) -> Result<bool, CacheError> {
        let complete = self
            .client
            .conn(move |conn| {
                let completed: Option<Option<String>> = conn
                    .query_row(
                        "SELECT sync_completed_at FROM metadata_versions
                         WHERE global_version_id = ?1",
                        [global_version_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                if !matches!(completed, Some(Some(_))) {
                    return Ok(false);
                }

                let entity_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM data_entities WHERE global_version_id = ?1",
                    [global_version_id],
                    |row| row.get(0),
                )?;
                Ok(entity_count > 0)
            })
            .await?;
        Ok(complete)
    }

    /// Upserts the metadata-version record, marking the version's sync as
    /// completed with the given counts.
    pub async fn mark_sync_completed(
        &self,
        global_version_id: i64,
        counts: SyncCounts,
    ) -> Result<(), CacheError> {
        self.client
            .conn(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT OR REPLACE INTO metadata_versions
                     (global_version_id, sync_completed_at, entity_count,
                      action_count, enumeration_count, label_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        global_version_id,
                        now,
                        counts.entity_count,
                        counts.action_count,
                        counts.enumeration_count,
                        counts.label_count
                    ],
                )?;
                Ok(())
            })
            .await?;
        info!(global_version_id, "marked sync completed");
        Ok(())
    }

    /// Returns row counts per metadata family.
    pub async fn get_cache_statistics(&self) -> Result<CacheStatistics, CacheError> {
        let stats = self
            .client
            .conn(|conn| {
                let count = |conn: &rusqlite::Connection, table: &str| -> rusqlite::Result<i64> {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })
                };
                Ok(CacheStatistics {
                    environment_count: count(conn, "environments")?,
                    global_version_count: count(conn, "global_versions")?,
                    data_entity_count: count(conn, "data_entities")?,
                    public_entity_count: count(conn, "public_entities")?,
                    enumeration_count: count(conn, "enumerations")?,
                    label_count: count(conn, "labels_cache")?,
                })
            })
            .await?;
        Ok(stats)
    }

    /// Closes the backing store.
    pub async fn close(&self) -> Result<(), CacheError> {
        self.client.close().await?;
        Ok(())
    }
}

/// Row counts per metadata family.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatistics {
    /// Known environments.
    pub environment_count: i64,
    /// Known global versions.
    pub global_version_count: i64,
    /// Data entity catalog rows across all versions.
    pub data_entity_count: i64,
    /// Public entity schemas across all versions.
    pub public_entity_count: i64,
    /// Enumerations across all versions.
    pub enumeration_count: i64,
    /// Cached labels.
    pub label_count: i64,
}
