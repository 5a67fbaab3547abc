//! Full-text search over cached metadata.
//!
//! The FTS5 index covers data entities, public entity schemas, and
//! enumerations. It is rebuilt per version after a sync's Indexing phase;
//! when FTS5 is unavailable in the linked SQLite, search falls back to a
//! LIKE scan over the same rows.

use std::time::Instant;

use async_sqlite::rusqlite;
use async_sqlite::rusqlite::Connection;
use tracing::info;
use tracing::warn;

use super::MetadataCache;
use super::schema;
use crate::error::CacheError;
use crate::model::MetadataType;
use crate::model::SearchQuery;
use crate::model::SearchResult;
use crate::model::SearchResults;

impl MetadataCache {
    /// Rebuilds the FTS rows for a version from the base tables.
    ///
    /// Drops and re-creates the virtual table first if its schema drifted.
    pub async fn rebuild_search_index(&self, global_version_id: i64) -> Result<(), CacheError> {
        schema::ensure_fts_schema(self.store()).await?;

        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM metadata_search WHERE global_version_id = ?1",
                    [global_version_id],
                )?;

                tx.execute(
                    "INSERT INTO metadata_search
                     (name, entity_set_name, labels, properties_text, actions_text,
                      entity_type, global_version_id)
                     SELECT name, public_collection_name, COALESCE(label_text, ''),
                            '', '', 'data_entity', ?1
                     FROM data_entities WHERE global_version_id = ?1",
                    [global_version_id],
                )?;

                tx.execute(
                    "INSERT INTO metadata_search
                     (name, entity_set_name, labels, properties_text, actions_text,
                      entity_type, global_version_id)
                     SELECT e.name, e.entity_set_name, COALESCE(e.label_text, ''),
                            COALESCE((SELECT group_concat(p.name, ' ')
                                      FROM entity_properties p WHERE p.entity_id = e.id), ''),
                            COALESCE((SELECT group_concat(a.name, ' ')
                                      FROM entity_actions a WHERE a.entity_id = e.id), ''),
                            'public_entity', ?1
                     FROM public_entities e WHERE e.global_version_id = ?1",
                    [global_version_id],
                )?;

                tx.execute(
                    "INSERT INTO metadata_search
                     (name, entity_set_name, labels, properties_text, actions_text,
                      entity_type, global_version_id)
                     SELECT e.name, '', COALESCE(e.label_text, ''),
                            COALESCE((SELECT group_concat(m.name, ' ')
                                      FROM enumeration_members m
                                      WHERE m.enumeration_id = e.id), ''),
                            '', 'enumeration', ?1
                     FROM enumerations e WHERE e.global_version_id = ?1",
                    [global_version_id],
                )?;

                tx.commit()
            })
            .await?;
        info!(global_version_id, "rebuilt search index");
        Ok(())
    }

    /// Searches the metadata index.
    ///
    /// Results order by BM25 relevance; `entity_types` restricts the
    /// families searched. Uses the version currently linked to this
    /// environment when `global_version_id` is `None`.
    pub async fn search(
        &self,
        query: &SearchQuery,
        global_version_id: Option<i64>,
    ) -> Result<SearchResults, CacheError> {
        let started = Instant::now();

        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(SearchResults {
                results: Vec::new(),
                total_count: 0,
                query_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                cache_hit: false,
            });
        };

        let query = query.clone();
        let outcome = self
            .store()
            .conn(move |conn| match fts_search(conn, &query, version) {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    warn!(error = %err, "FTS search failed, falling back to LIKE scan");
                    like_search(conn, &query, version)
                }
            })
            .await?;

        let (results, total_count) = outcome;
        Ok(SearchResults {
            results,
            total_count,
            query_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            cache_hit: false,
        })
    }
}

type SearchOutcome = (Vec<SearchResult>, i64);

fn type_filter_clause(types: &Option<Vec<MetadataType>>) -> String {
    match types {
        Some(types) if !types.is_empty() => {
            let names = types
                .iter()
                .map(|t| format!("'{}'", t.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            format!(" AND entity_type IN ({})", names)
        }
        _ => String::new(),
    }
}

/// Quotes user text as a single FTS5 phrase with a prefix wildcard, so
/// operator characters in the input cannot break the query.
fn fts_match_expression(text: &str) -> String {
    format!("\"{}\"*", text.replace('"', "\"\""))
}

fn fts_search(
    conn: &Connection,
    query: &SearchQuery,
    version: i64,
) -> rusqlite::Result<SearchOutcome> {
    let type_clause = type_filter_clause(&query.entity_types);
    let match_expr = fts_match_expression(&query.text);

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM metadata_search
             WHERE metadata_search MATCH ?1 AND global_version_id = ?2{}",
            type_clause
        ),
        rusqlite::params![match_expr, version],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT name, entity_type, entity_set_name, labels,
                snippet(metadata_search, -1, '[', ']', '…', 8), bm25(metadata_search)
         FROM metadata_search
         WHERE metadata_search MATCH ?1 AND global_version_id = ?2{}
         ORDER BY bm25(metadata_search) LIMIT ?3 OFFSET ?4",
        type_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![match_expr, version, query.limit as i64, query.offset as i64],
        |row| {
            let entity_type: String = row.get(1)?;
            let entity_set_name: String = row.get(2)?;
            let labels: String = row.get(3)?;
            let rank: f64 = row.get(5)?;
            Ok(SearchResult {
                name: row.get(0)?,
                entity_type: MetadataType::parse(&entity_type)
                    .unwrap_or(MetadataType::DataEntity),
                entity_set_name: (!entity_set_name.is_empty()).then_some(entity_set_name),
                label_text: (!labels.is_empty()).then_some(labels),
                snippet: row.get(4)?,
                relevance: -rank,
            })
        },
    )?;
    let results = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((results, total))
}

fn like_search(
    conn: &Connection,
    query: &SearchQuery,
    version: i64,
) -> rusqlite::Result<SearchOutcome> {
    let type_clause = type_filter_clause(&query.entity_types);
    let pattern = format!("%{}%", query.text);

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM metadata_search
             WHERE (name LIKE ?1 OR labels LIKE ?1 OR properties_text LIKE ?1)
               AND global_version_id = ?2{}",
            type_clause
        ),
        rusqlite::params![pattern, version],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT name, entity_type, entity_set_name, labels
         FROM metadata_search
         WHERE (name LIKE ?1 OR labels LIKE ?1 OR properties_text LIKE ?1)
           AND global_version_id = ?2{}
         ORDER BY name LIMIT ?3 OFFSET ?4",
        type_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params![pattern, version, query.limit as i64, query.offset as i64],
        |row| {
            let entity_type: String = row.get(1)?;
            let entity_set_name: String = row.get(2)?;
            let labels: String = row.get(3)?;
            Ok(SearchResult {
                name: row.get(0)?,
                entity_type: MetadataType::parse(&entity_type)
                    .unwrap_or(MetadataType::DataEntity),
                entity_set_name: (!entity_set_name.is_empty()).then_some(entity_set_name),
                label_text: (!labels.is_empty()).then_some(labels),
                snippet: None,
                relevance: 0.0,
            })
        },
    )?;
    let results = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((results, total))
}
