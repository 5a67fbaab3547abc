//! Global version management.
//!
//! Environments with identical module sets share one `global_versions` row,
//! found by a canonical hash of the sorted module list. `reference_count`
//! always equals the number of environments whose current link points at
//! the row. Environments and global versions are never deleted.

use async_sqlite::Client;
use async_sqlite::rusqlite;
use async_sqlite::rusqlite::Connection;
use async_sqlite::rusqlite::OptionalExtension;
use chrono::DateTime;
use chrono::Utc;
use sha2::Digest;
use sha2::Sha256;
use tracing::info;

use crate::error::CacheError;
use crate::model::EnvironmentVersionInfo;
use crate::model::GlobalVersionInfo;
use crate::model::ModuleVersionInfo;
use crate::model::VersionSyncStatus;

/// Computes the canonical hash of a module list.
///
/// Modules are sorted by `module_id`, rendered as `module_id|version` lines
/// joined by `\n`, hashed with SHA-256, and truncated to 16 hex characters.
pub fn compute_version_hash(modules: &[ModuleVersionInfo]) -> String {
    let mut sorted: Vec<&ModuleVersionInfo> = modules.iter().collect();
    sorted.sort_by(|a, b| a.module_id.cmp(&b.module_id));

    let canonical = sorted
        .iter()
        .map(|m| format!("{}|{}", m.module_id, m.version))
        .collect::<Vec<_>>()
        .join("\n");

    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Aggregate statistics over the global version catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionStatistics {
    /// Known global versions.
    pub global_version_count: i64,
    /// Known environments.
    pub environment_count: i64,
    /// Environments with a current version link.
    pub linked_environment_count: i64,
    /// Versions referenced by more than one environment.
    pub shared_version_count: i64,
    /// Module rows across all versions.
    pub total_module_count: i64,
}

/// Manages the global version catalog inside the metadata store.
///
/// Obtained from [`MetadataCache::version_manager`](crate::cache::MetadataCache::version_manager);
/// shares the cache's store handle.
#[derive(Clone)]
pub struct GlobalVersionManager {
    client: Client,
}

impl GlobalVersionManager {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    /// Registers the detected module set for an environment.
    ///
    /// Upserts the global version by hash, links the environment to it, and
    /// keeps `reference_count` equal to the number of linked environments
    /// (decrementing a previously linked version's count when the
    /// environment moves). Returns `(global_version_id, is_new_version)`.
    pub async fn register_environment_version(
        &self,
        environment_id: i64,
        modules: &[ModuleVersionInfo],
        application_version: Option<String>,
        platform_version: Option<String>,
        application_build_version: Option<String>,
    ) -> Result<(i64, bool), CacheError> {
        let hash = compute_version_hash(modules);
        let mut sorted = modules.to_vec();
        sorted.sort_by(|a, b| a.module_id.cmp(&b.module_id));

        let result = self
            .client
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now().to_rfc3339();

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM global_versions WHERE version_hash = ?1",
                        [&hash],
                        |row| row.get(0),
                    )
                    .optional()?;

                let (version_id, is_new) = match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE global_versions SET last_seen_at = ?1 WHERE id = ?2",
                            rusqlite::params![now, id],
                        )?;
                        (id, false)
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO global_versions
                             (version_hash, application_version, platform_version,
                              application_build_version, reference_count,
                              first_seen_at, last_seen_at)
                             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                            rusqlite::params![
                                hash,
                                application_version,
                                platform_version,
                                application_build_version,
                                now
                            ],
                        )?;
                        let id = tx.last_insert_rowid();

                        let mut stmt = tx.prepare(
                            "INSERT INTO global_version_modules
                             (global_version_id, module_id, name, version, publisher,
                              display_name, module_order)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        )?;
                        for (order, module) in sorted.iter().enumerate() {
                            stmt.execute(rusqlite::params![
                                id,
                                module.module_id,
                                module.name,
                                module.version,
                                module.publisher,
                                module.display_name,
                                order as i64
                            ])?;
                        }
                        drop(stmt);
                        (id, true)
                    }
                };

                let current: Option<i64> = tx
                    .query_row(
                        "SELECT global_version_id FROM environment_versions
                         WHERE environment_id = ?1 AND is_current = 1",
                        [environment_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                match current {
                    Some(linked) if linked == version_id => {}
                    Some(old_version) => {
                        tx.execute(
                            "UPDATE global_versions
                             SET reference_count = MAX(reference_count - 1, 0)
                             WHERE id = ?1",
                            [old_version],
                        )?;
                        tx.execute(
                            "UPDATE environment_versions SET is_current = 0
                             WHERE environment_id = ?1 AND global_version_id = ?2",
                            rusqlite::params![environment_id, old_version],
                        )?;
                        link_environment(&tx, environment_id, version_id, &now)?;
                    }
                    None => {
                        link_environment(&tx, environment_id, version_id, &now)?;
                    }
                }

                tx.commit()?;
                Ok((version_id, is_new))
            })
            .await?;

        let (version_id, is_new) = result;
        info!(environment_id, version_id, is_new, "registered environment version");
        Ok(result)
    }

    /// Finds global versions whose module set equals (`exact_match`) or is a
    /// superset of the given module list.
    ///
    /// Equality is compared on the `(module_id, version)` set itself rather
    /// than the stored hash, so rows written with an older hash format are
    /// still found and shareable.
    pub async fn find_compatible_versions(
        &self,
        modules: &[ModuleVersionInfo],
        exact_match: bool,
    ) -> Result<Vec<GlobalVersionInfo>, CacheError> {
        let keys: Vec<String> = modules
            .iter()
            .map(|m| format!("{}|{}", m.module_id, m.version))
            .collect();
        let required = keys.len() as i64;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = self
            .client
            .conn(move |conn| {
                let placeholders = keys.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let mut sql = format!(
                    "SELECT gv.id FROM global_versions gv
                     WHERE (SELECT COUNT(DISTINCT m.module_id || '|' || m.version)
                            FROM global_version_modules m
                            WHERE m.global_version_id = gv.id
                              AND (m.module_id || '|' || m.version) IN ({})) = ?",
                    placeholders
                );
                if exact_match {
                    sql.push_str(
                        " AND (SELECT COUNT(*) FROM global_version_modules m
                               WHERE m.global_version_id = gv.id) = ?",
                    );
                }
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = keys
                    .iter()
                    .map(|k| Box::new(k.clone()) as Box<dyn rusqlite::ToSql>)
                    .collect();
                params.push(Box::new(required));
                if exact_match {
                    params.push(Box::new(required));
                }

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                    |row| row.get::<_, i64>(0),
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;

        let mut versions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.get_global_version_info(id).await? {
                versions.push(info);
            }
        }
        Ok(versions)
    }

    /// Inserts a global version row with an explicit hash and no environment
    /// link.
    ///
    /// Import/migration helper for carrying over rows whose hash was
    /// computed by an older format; normal registration goes through
    /// [`register_environment_version`](Self::register_environment_version).
    pub async fn import_version(
        &self,
        modules: &[ModuleVersionInfo],
        application_version: Option<String>,
        platform_version: Option<String>,
        application_build_version: Option<String>,
        version_hash: &str,
    ) -> Result<i64, CacheError> {
        let mut sorted = modules.to_vec();
        sorted.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        let version_hash = version_hash.to_string();

        let id = self
            .client
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now().to_rfc3339();
                tx.execute(
                    "INSERT INTO global_versions
                     (version_hash, application_version, platform_version,
                      application_build_version, reference_count,
                      first_seen_at, last_seen_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                    rusqlite::params![
                        version_hash,
                        application_version,
                        platform_version,
                        application_build_version,
                        now
                    ],
                )?;
                let id = tx.last_insert_rowid();

                let mut stmt = tx.prepare(
                    "INSERT INTO global_version_modules
                     (global_version_id, module_id, name, version, publisher,
                      display_name, module_order)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for (order, module) in sorted.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        id,
                        module.module_id,
                        module.name,
                        module.version,
                        module.publisher,
                        module.display_name,
                        order as i64
                    ])?;
                }
                drop(stmt);
                tx.commit()?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    /// Writes the sync status of an environment-version link.
    pub async fn update_sync_status(
        &self,
        environment_id: i64,
        global_version_id: i64,
        status: VersionSyncStatus,
        duration_ms: Option<i64>,
    ) -> Result<(), CacheError> {
        self.client
            .conn(move |conn| {
                match duration_ms {
                    Some(duration) => conn.execute(
                        "UPDATE environment_versions
                         SET last_sync_status = ?1, last_sync_duration_ms = ?2
                         WHERE environment_id = ?3 AND global_version_id = ?4",
                        rusqlite::params![status.as_str(), duration, environment_id, global_version_id],
                    )?,
                    None => conn.execute(
                        "UPDATE environment_versions SET last_sync_status = ?1
                         WHERE environment_id = ?2 AND global_version_id = ?3",
                        rusqlite::params![status.as_str(), environment_id, global_version_id],
                    )?,
                };
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Loads a global version with its module list.
    pub async fn get_global_version_info(
        &self,
        global_version_id: i64,
    ) -> Result<Option<GlobalVersionInfo>, CacheError> {
        let info = self
            .client
            .conn(move |conn| {
                let header = conn
                    .query_row(
                        "SELECT id, version_hash, application_version, platform_version,
                                application_build_version, reference_count,
                                first_seen_at, last_seen_at
                         FROM global_versions WHERE id = ?1",
                        [global_version_id],
                        |row| {
                            Ok(GlobalVersionInfo {
                                id: row.get(0)?,
                                version_hash: row.get(1)?,
                                application_version: row.get(2)?,
                                platform_version: row.get(3)?,
                                application_build_version: row.get(4)?,
                                modules: Vec::new(),
                                reference_count: row.get(5)?,
                                first_seen_at: parse_timestamp(&row.get::<_, String>(6)?),
                                last_seen_at: parse_timestamp(&row.get::<_, String>(7)?),
                            })
                        },
                    )
                    .optional()?;

                let Some(mut info) = header else {
                    return Ok(None);
                };
                info.modules = load_modules(conn, global_version_id)?;
                Ok(Some(info))
            })
            .await?;
        Ok(info)
    }

    /// Loads the current version link of an environment.
    pub async fn get_environment_version_info(
        &self,
        environment_id: i64,
    ) -> Result<Option<EnvironmentVersionInfo>, CacheError> {
        let info = self
            .client
            .conn(move |conn| {
                conn.query_row(
                    "SELECT environment_id, global_version_id, last_sync_status,
                            last_sync_duration_ms, linked_at
                     FROM environment_versions
                     WHERE environment_id = ?1 AND is_current = 1",
                    [environment_id],
                    |row| {
                        Ok(EnvironmentVersionInfo {
                            environment_id: row.get(0)?,
                            global_version_id: row.get(1)?,
                            last_sync_status: VersionSyncStatus::parse(
                                &row.get::<_, String>(2)?,
                            ),
                            last_sync_duration_ms: row.get(3)?,
                            linked_at: parse_timestamp(&row.get::<_, String>(4)?),
                        })
                    },
                )
                .optional()
            })
            .await?;
        Ok(info)
    }

    /// Returns aggregate statistics over the global version catalog.
    pub async fn get_version_statistics(&self) -> Result<VersionStatistics, CacheError> {
        let stats = self
            .client
            .conn(|conn| {
                let global_version_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM global_versions", [], |row| row.get(0))?;
                let environment_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM environments", [], |row| row.get(0))?;
                let linked_environment_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM environment_versions WHERE is_current = 1",
                    [],
                    |row| row.get(0),
                )?;
                let shared_version_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM global_versions WHERE reference_count > 1",
                    [],
                    |row| row.get(0),
                )?;
                let total_module_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM global_version_modules",
                    [],
                    |row| row.get(0),
                )?;
                Ok(VersionStatistics {
                    global_version_count,
                    environment_count,
                    linked_environment_count,
                    shared_version_count,
                    total_module_count,
                })
            })
            .await?;
        Ok(stats)
    }

    /// Lists every global version ID known to the store.
    pub async fn list_global_version_ids(&self) -> Result<Vec<i64>, CacheError> {
        let ids = self
            .client
            .conn(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id FROM global_versions ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(ids)
    }
}

fn link_environment(
    tx: &Connection,
    environment_id: i64,
    version_id: i64,
    now: &str,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO environment_versions
         (environment_id, global_version_id, is_current, last_sync_status, linked_at)
         VALUES (?1, ?2, 1, 'pending', ?3)
         ON CONFLICT (environment_id, global_version_id)
         DO UPDATE SET is_current = 1, linked_at = excluded.linked_at",
        rusqlite::params![environment_id, version_id, now],
    )?;
    tx.execute(
        "UPDATE global_versions SET reference_count = reference_count + 1 WHERE id = ?1",
        [version_id],
    )?;
    Ok(())
}

fn load_modules(
    conn: &Connection,
    global_version_id: i64,
) -> rusqlite::Result<Vec<ModuleVersionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT module_id, name, version, publisher, display_name
         FROM global_version_modules
         WHERE global_version_id = ?1 ORDER BY module_order",
    )?;
    let rows = stmt.query_map([global_version_id], |row| {
        Ok(ModuleVersionInfo {
            module_id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            publisher: row.get(3)?,
            display_name: row.get(4)?,
        })
    })?;
    rows.collect()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(id: &str, version: &str) -> ModuleVersionInfo {
        ModuleVersionInfo {
            module_id: id.to_string(),
            name: id.to_string(),
            version: version.to_string(),
            publisher: "Microsoft Corporation".to_string(),
            display_name: id.to_string(),
        }
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = vec![module("mA", "1.0"), module("mB", "2.0")];
        let b = vec![module("mB", "2.0"), module("mA", "1.0")];
        assert_eq!(compute_version_hash(&a), compute_version_hash(&b));
    }

    #[test]
    fn test_hash_is_16_hex_chars() {
        let hash = compute_version_hash(&[module("mA", "1.0")]);
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_changes_with_version() {
        let a = compute_version_hash(&[module("mA", "1.0")]);
        let b = compute_version_hash(&[module("mA", "1.1")]);
        assert_ne!(a, b);
    }
}
