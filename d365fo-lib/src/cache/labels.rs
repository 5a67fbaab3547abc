//! Label cache rows with TTL.
//!
//! Keyed by (label_id, language). Expired rows are ignored on read and may
//! be swept lazily; last writer wins, which is acceptable because label text
//! is effectively immutable.

use std::collections::HashMap;
use std::time::Duration;

use async_sqlite::rusqlite;
use async_sqlite::rusqlite::OptionalExtension;
use chrono::Utc;

use super::MetadataCache;
use crate::error::CacheError;
use crate::model::LabelInfo;

impl MetadataCache {
    /// Reads a cached label, ignoring expired rows.
    pub async fn get_label(
        &self,
        label_id: &str,
        language: &str,
    ) -> Result<Option<String>, CacheError> {
        let label_id = label_id.to_string();
        let language = language.to_string();
        let now = Utc::now().timestamp();

        let value = self
            .store()
            .conn(move |conn| {
                conn.query_row(
                    "SELECT value FROM labels_cache
                     WHERE label_id = ?1 AND language = ?2 AND expires_at > ?3",
                    rusqlite::params![label_id, language, now],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await?;
        Ok(value)
    }

    /// Writes one label with the given TTL.
    pub async fn set_label(
        &self,
        label_id: &str,
        language: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let label = LabelInfo::new(label_id, language, value);
        self.set_labels_batch(&[label], ttl).await
    }

    /// Reads many labels at once, returning only unexpired hits.
    pub async fn get_labels_batch(
        &self,
        label_ids: &[String],
        language: &str,
    ) -> Result<HashMap<String, String>, CacheError> {
        if label_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let label_ids = label_ids.to_vec();
        let language = language.to_string();
        let now = Utc::now().timestamp();

        let hits = self
            .store()
            .conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT value FROM labels_cache
                     WHERE label_id = ?1 AND language = ?2 AND expires_at > ?3",
                )?;
                let mut hits = HashMap::new();
                for label_id in &label_ids {
                    let value: Option<String> = stmt
                        .query_row(rusqlite::params![label_id, language, now], |row| row.get(0))
                        .optional()?;
                    if let Some(value) = value {
                        hits.insert(label_id.clone(), value);
                    }
                }
                Ok(hits)
            })
            .await?;
        Ok(hits)
    }

    /// Bulk-writes labels with the given TTL.
    pub async fn set_labels_batch(
        &self,
        labels: &[LabelInfo],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if labels.is_empty() {
            return Ok(());
        }

        let labels = labels.to_vec();
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;

        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO labels_cache
                         (label_id, language, value, cached_at, expires_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for label in &labels {
                        stmt.execute(rusqlite::params![
                            label.id,
                            label.language,
                            label.value,
                            now,
                            expires_at
                        ])?;
                    }
                }
                tx.commit()
            })
            .await?;
        Ok(())
    }

    /// Deletes expired label rows, returning how many were removed.
    pub async fn sweep_expired_labels(&self) -> Result<usize, CacheError> {
        let now = Utc::now().timestamp();
        let removed = self
            .store()
            .conn(move |conn| conn.execute("DELETE FROM labels_cache WHERE expires_at <= ?1", [now]))
            .await?;
        Ok(removed)
    }

    /// Collects every distinct label ID referenced by a version's entities,
    /// schemas, and enumerations. Feeds the sync engine's label phase.
    pub async fn collect_label_ids(
        &self,
        global_version_id: i64,
    ) -> Result<Vec<String>, CacheError> {
        let ids = self
            .store()
            .conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT label_id FROM (
                         SELECT label_id FROM data_entities WHERE global_version_id = ?1
                         UNION
                         SELECT label_id FROM public_entities WHERE global_version_id = ?1
                         UNION
                         SELECT label_id FROM entity_properties WHERE global_version_id = ?1
                         UNION
                         SELECT label_id FROM enumerations WHERE global_version_id = ?1
                         UNION
                         SELECT label_id FROM enumeration_members WHERE global_version_id = ?1
                     ) WHERE label_id IS NOT NULL AND label_id != ''",
                )?;
                let rows = stmt.query_map([global_version_id], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(ids)
    }
}
