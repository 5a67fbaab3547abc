//! Label resolution with cache write-through.
//!
//! The remote exposes only single-label GETs, so batched lookups partition
//! into cached and uncached IDs, fetch the uncached ones with bounded
//! fan-out, and bulk-insert the results into the cache. A 404 yields an
//! absent label and is never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use super::metadata::MetadataApi;
use crate::cache::MetadataCache;
use crate::error::Error;
use crate::model::EnumerationInfo;
use crate::model::LabelInfo;
use crate::model::PublicEntityInfo;

/// How many label fetches run concurrently in a batch.
const BATCH_FANOUT: usize = 8;

/// Label lookup and resolution over the Metadata API and the label cache.
pub struct LabelOperations {
    api: Arc<MetadataApi>,
    cache: Option<Arc<MetadataCache>>,
    ttl: Duration,
}

impl LabelOperations {
    /// Creates label operations; pass `None` for `cache` to disable caching.
    pub fn new(api: Arc<MetadataApi>, cache: Option<Arc<MetadataCache>>, ttl: Duration) -> Self {
        Self { api, cache, ttl }
    }

    /// Resolves one label: cache first, then the remote with write-through.
    ///
    /// Returns `None` when the label does not exist; the returned text may
    /// be empty.
    pub async fn get_label_text(
        &self,
        label_id: &str,
        language: &str,
    ) -> Result<Option<String>, Error> {
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get_label(label_id, language).await? {
                return Ok(Some(value));
            }
        }

        let Some(value) = self.api.get_label(label_id, language).await? else {
            return Ok(None);
        };

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.set_label(label_id, language, &value, self.ttl).await {
                warn!(label_id, error = %err, "label cache write failed");
            }
        }

        Ok(Some(value))
    }

    /// Resolves many labels, returning a map of the ones that exist.
    pub async fn get_labels_batch(
        &self,
        label_ids: &[String],
        language: &str,
    ) -> Result<HashMap<String, String>, Error> {
        if label_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut results = match &self.cache {
            Some(cache) => cache.get_labels_batch(label_ids, language).await?,
            None => HashMap::new(),
        };

        let uncached: Vec<&String> = label_ids
            .iter()
            .filter(|id| !results.contains_key(*id))
            .collect();

        let mut fetched = Vec::new();
        for chunk in uncached.chunks(BATCH_FANOUT) {
            let lookups = chunk
                .iter()
                .map(|id| async move { (id.as_str(), self.api.get_label(id, language).await) });
            for (id, outcome) in join_all(lookups).await {
                match outcome {
                    Ok(Some(value)) => {
                        results.insert(id.to_string(), value.clone());
                        fetched.push(LabelInfo::new(id, language, value));
                    }
                    Ok(None) => {}
                    Err(err) => warn!(label_id = id, error = %err, "label fetch failed"),
                }
            }
        }

        if !fetched.is_empty() {
            if let Some(cache) = &self.cache {
                if let Err(err) = cache.set_labels_batch(&fetched, self.ttl).await {
                    warn!(error = %err, "label cache batch write failed");
                }
            }
        }

        Ok(results)
    }

    /// Resolves the label tokens of an entity schema and its properties,
    /// assigning `label_text` in place with one batched lookup.
    pub async fn resolve_entity_labels(
        &self,
        entity: &mut PublicEntityInfo,
        language: &str,
    ) -> Result<(), Error> {
        let mut ids = Vec::new();
        if let Some(id) = &entity.label_id {
            ids.push(id.clone());
        }
        for prop in &entity.properties {
            if let Some(id) = &prop.label_id {
                ids.push(id.clone());
            }
        }
        if ids.is_empty() {
            return Ok(());
        }

        let labels = self.get_labels_batch(&ids, language).await?;

        if let Some(id) = &entity.label_id {
            entity.label_text = labels.get(id).cloned();
        }
        for prop in &mut entity.properties {
            if let Some(id) = &prop.label_id {
                prop.label_text = labels.get(id).cloned();
            }
        }
        Ok(())
    }

    /// Resolves the label tokens of an enumeration and its members.
    pub async fn resolve_enumeration_labels(
        &self,
        enumeration: &mut EnumerationInfo,
        language: &str,
    ) -> Result<(), Error> {
        let mut ids = Vec::new();
        if let Some(id) = &enumeration.label_id {
            ids.push(id.clone());
        }
        for member in &enumeration.members {
            if let Some(id) = &member.label_id {
                ids.push(id.clone());
            }
        }
        if ids.is_empty() {
            return Ok(());
        }

        let labels = self.get_labels_batch(&ids, language).await?;

        if let Some(id) = &enumeration.label_id {
            enumeration.label_text = labels.get(id).cloned();
        }
        for member in &mut enumeration.members {
            if let Some(id) = &member.label_id {
                member.label_text = labels.get(id).cloned();
            }
        }
        Ok(())
    }
}
