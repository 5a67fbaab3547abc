//! Enumeration storage.

use async_sqlite::rusqlite;
use async_sqlite::rusqlite::Connection;
use async_sqlite::rusqlite::OptionalExtension;
use tracing::debug;

use super::MetadataCache;
use crate::error::CacheError;
use crate::model::EnumerationInfo;
use crate::model::EnumerationMemberInfo;

impl MetadataCache {
    /// Replaces all enumerations for a version.
    pub async fn store_enumerations(
        &self,
        global_version_id: i64,
        enumerations: &[EnumerationInfo],
    ) -> Result<(), CacheError> {
        let enumerations = enumerations.to_vec();
        let count = enumerations.len();
        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM enumeration_members WHERE global_version_id = ?1",
                    [global_version_id],
                )?;
                tx.execute(
                    "DELETE FROM enumerations WHERE global_version_id = ?1",
                    [global_version_id],
                )?;

                for info in &enumerations {
                    tx.execute(
                        "INSERT INTO enumerations (global_version_id, name, label_id, label_text)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![global_version_id, info.name, info.label_id, info.label_text],
                    )?;
                    let enum_id = tx.last_insert_rowid();
                    insert_members(&tx, enum_id, global_version_id, &info.members)?;
                }
                tx.commit()
            })
            .await?;
        debug!(global_version_id, count, "stored enumerations");
        Ok(())
    }

    /// Loads one enumeration with its members.
    pub async fn get_enumeration_info(
        &self,
        enum_name: &str,
        global_version_id: Option<i64>,
    ) -> Result<Option<EnumerationInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(None);
        };

        let enum_name = enum_name.to_string();
        let info = self
            .store()
            .conn(move |conn| {
                let header: Option<(i64, EnumerationInfo)> = conn
                    .query_row(
                        "SELECT id, name, label_id, label_text FROM enumerations
                         WHERE global_version_id = ?1 AND name = ?2",
                        rusqlite::params![version, enum_name],
                        enum_header_from_row,
                    )
                    .optional()?;

                let Some((enum_id, mut info)) = header else {
                    return Ok(None);
                };
                info.members = load_members(conn, enum_id)?;
                Ok(Some(info))
            })
            .await?;
        Ok(info)
    }

    /// Lists all enumerations for a version, members included.
    pub async fn get_enumerations(
        &self,
        global_version_id: Option<i64>,
    ) -> Result<Vec<EnumerationInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(Vec::new());
        };

        let enums = self
            .store()
            .conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, label_id, label_text FROM enumerations
                     WHERE global_version_id = ?1 ORDER BY name",
                )?;
                let headers = stmt
                    .query_map([version], enum_header_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut result = Vec::with_capacity(headers.len());
                for (enum_id, mut info) in headers {
                    info.members = load_members(conn, enum_id)?;
                    result.push(info);
                }
                Ok(result)
            })
            .await?;
        Ok(enums)
    }
}

fn enum_header_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, EnumerationInfo)> {
    Ok((
        row.get(0)?,
        EnumerationInfo {
            name: row.get(1)?,
            label_id: row.get(2)?,
            label_text: row.get(3)?,
            members: Vec::new(),
        },
    ))
}

fn insert_members(
    tx: &Connection,
    enum_id: i64,
    global_version_id: i64,
    members: &[EnumerationMemberInfo],
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO enumeration_members
         (enumeration_id, global_version_id, name, value, label_id, label_text,
          configuration_enabled, member_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for member in members {
        stmt.execute(rusqlite::params![
            enum_id,
            global_version_id,
            member.name,
            member.value,
            member.label_id,
            member.label_text,
            member.configuration_enabled,
            member.member_order
        ])?;
    }
    Ok(())
}

fn load_members(
    conn: &Connection,
    enum_id: i64,
) -> rusqlite::Result<Vec<EnumerationMemberInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, value, label_id, label_text, configuration_enabled, member_order
         FROM enumeration_members WHERE enumeration_id = ?1 ORDER BY member_order",
    )?;
    let rows = stmt.query_map([enum_id], |row| {
        Ok(EnumerationMemberInfo {
            name: row.get(0)?,
            value: row.get(1)?,
            label_id: row.get(2)?,
            label_text: row.get(3)?,
            configuration_enabled: row.get(4)?,
            member_order: row.get(5)?,
        })
    })?;
    rows.collect()
}
