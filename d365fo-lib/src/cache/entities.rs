//! Data entity and public entity schema storage.

use async_sqlite::rusqlite;
use async_sqlite::rusqlite::Connection;
use async_sqlite::rusqlite::OptionalExtension;
use tracing::debug;

use super::MetadataCache;
use crate::error::CacheError;
use crate::model::ActionInfo;
use crate::model::ActionParameterInfo;
use crate::model::ActionTypeInfo;
use crate::model::DataEntityInfo;
use crate::model::EntityCategory;
use crate::model::NavigationPropertyInfo;
use crate::model::PropertyGroupInfo;
use crate::model::PropertyInfo;
use crate::model::PublicEntityInfo;
use crate::model::RelationConstraint;

/// Read-side filter for data entity queries.
#[derive(Debug, Clone, Default)]
pub struct DataEntityFilter {
    /// Restrict to entities with this `data_service_enabled` value.
    pub data_service_enabled: Option<bool>,
    /// Restrict to this category.
    pub entity_category: Option<EntityCategory>,
    /// SQL `LIKE` pattern on the entity name.
    pub name_pattern: Option<String>,
}

impl MetadataCache {
    /// Replaces all data entity rows for a version.
    ///
    /// Any pre-existing rows for the version are deleted first; re-storing
    /// replaces, never unions.
    pub async fn store_data_entities(
        &self,
        global_version_id: i64,
        entities: &[DataEntityInfo],
    ) -> Result<(), CacheError> {
        let entities = entities.to_vec();
        let count = entities.len();
        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM data_entities WHERE global_version_id = ?1",
                    [global_version_id],
                )?;
                insert_data_entities(&tx, global_version_id, &entities)?;
                tx.commit()
            })
            .await?;
        debug!(global_version_id, count, "stored data entities");
        Ok(())
    }

    /// Deletes all data entity rows for a version.
    ///
    /// Used with [`append_data_entities`](Self::append_data_entities) when a
    /// sync wants chunked inserts with progress in between.
    pub(crate) async fn clear_data_entities(
        &self,
        global_version_id: i64,
    ) -> Result<(), CacheError> {
        self.store()
            .conn(move |conn| {
                conn.execute(
                    "DELETE FROM data_entities WHERE global_version_id = ?1",
                    [global_version_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Appends a chunk of data entity rows for a version.
    pub(crate) async fn append_data_entities(
        &self,
        global_version_id: i64,
        entities: &[DataEntityInfo],
    ) -> Result<(), CacheError> {
        let entities = entities.to_vec();
        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;
                insert_data_entities(&tx, global_version_id, &entities)?;
                tx.commit()
            })
            .await?;
        Ok(())
    }

    /// Reads data entities for a version (the environment's current version
    /// when `None`), applying the given filter.
    pub async fn get_data_entities(
        &self,
        global_version_id: Option<i64>,
        filter: &DataEntityFilter,
    ) -> Result<Vec<DataEntityInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(Vec::new());
        };

        let filter = filter.clone();
        let entities = self
            .store()
            .conn(move |conn| {
                let mut sql = String::from(
                    "SELECT name, public_entity_name, public_collection_name, label_id,
                            label_text, entity_category, data_service_enabled,
                            data_management_enabled, is_read_only
                     FROM data_entities WHERE global_version_id = ?1",
                );
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(version)];

                if let Some(enabled) = filter.data_service_enabled {
                    sql.push_str(" AND data_service_enabled = ?");
                    params.push(Box::new(enabled));
                }
                if let Some(category) = filter.entity_category {
                    sql.push_str(" AND entity_category = ?");
                    params.push(Box::new(category.as_str().to_string()));
                }
                if let Some(pattern) = filter.name_pattern {
                    sql.push_str(" AND name LIKE ?");
                    params.push(Box::new(pattern));
                }
                sql.push_str(" ORDER BY name");

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                    data_entity_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(entities)
    }

    /// Looks up a data entity by its OData collection name.
    pub async fn get_data_entity_by_collection(
        &self,
        global_version_id: Option<i64>,
        collection_name: &str,
    ) -> Result<Option<DataEntityInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(None);
        };

        let collection_name = collection_name.to_string();
        let entity = self
            .store()
            .conn(move |conn| {
                conn.query_row(
                    "SELECT name, public_entity_name, public_collection_name, label_id,
                            label_text, entity_category, data_service_enabled,
                            data_management_enabled, is_read_only
                     FROM data_entities
                     WHERE global_version_id = ?1 AND public_collection_name = ?2",
                    rusqlite::params![version, collection_name],
                    data_entity_from_row,
                )
                .optional()
            })
            .await?;
        Ok(entity)
    }

    /// Upserts a public entity schema, wiping and rewriting its properties,
    /// navigation properties with constraints, property groups, and actions.
    pub async fn store_public_entity_schema(
        &self,
        global_version_id: i64,
        entity: &PublicEntityInfo,
    ) -> Result<(), CacheError> {
        let entity = entity.clone();
        self.store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM public_entities
                         WHERE global_version_id = ?1 AND name = ?2",
                        rusqlite::params![global_version_id, entity.name],
                        |row| row.get(0),
                    )
                    .optional()?;

                let entity_id = match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE public_entities
                             SET entity_set_name = ?1, label_id = ?2, label_text = ?3,
                                 is_read_only = ?4, configuration_enabled = ?5
                             WHERE id = ?6",
                            rusqlite::params![
                                entity.entity_set_name,
                                entity.label_id,
                                entity.label_text,
                                entity.is_read_only,
                                entity.configuration_enabled,
                                id
                            ],
                        )?;
                        delete_entity_children(&tx, id)?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO public_entities
                             (global_version_id, name, entity_set_name, label_id,
                              label_text, is_read_only, configuration_enabled)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            rusqlite::params![
                                global_version_id,
                                entity.name,
                                entity.entity_set_name,
                                entity.label_id,
                                entity.label_text,
                                entity.is_read_only,
                                entity.configuration_enabled
                            ],
                        )?;
                        tx.last_insert_rowid()
                    }
                };

                insert_entity_children(&tx, entity_id, global_version_id, &entity)?;
                tx.commit()
            })
            .await?;
        Ok(())
    }

    /// Loads a full public entity schema by entity name.
    pub async fn get_public_entity_schema(
        &self,
        entity_name: &str,
        global_version_id: Option<i64>,
    ) -> Result<Option<PublicEntityInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(None);
        };
        let entity_name = entity_name.to_string();
        self.load_schema(move |conn| {
            conn.query_row(
                "SELECT id, name, entity_set_name, label_id, label_text,
                        is_read_only, configuration_enabled
                 FROM public_entities
                 WHERE global_version_id = ?1 AND name = ?2",
                rusqlite::params![version, entity_name],
                entity_header_from_row,
            )
            .optional()
        })
        .await
    }

    /// Loads a full public entity schema by its OData entity-set name.
    pub async fn get_public_entity_schema_by_set_name(
        &self,
        entity_set_name: &str,
        global_version_id: Option<i64>,
    ) -> Result<Option<PublicEntityInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(None);
        };
        let entity_set_name = entity_set_name.to_string();
        self.load_schema(move |conn| {
            conn.query_row(
                "SELECT id, name, entity_set_name, label_id, label_text,
                        is_read_only, configuration_enabled
                 FROM public_entities
                 WHERE global_version_id = ?1 AND entity_set_name = ?2",
                rusqlite::params![version, entity_set_name],
                entity_header_from_row,
            )
            .optional()
        })
        .await
    }

    /// Lists public entity summary rows for a version. Children are not
    /// loaded; use [`get_public_entity_schema`](Self::get_public_entity_schema)
    /// for the full shape.
    pub async fn get_public_entities(
        &self,
        global_version_id: Option<i64>,
    ) -> Result<Vec<PublicEntityInfo>, CacheError> {
        let Some(version) = self.resolve_version(global_version_id).await? else {
            return Ok(Vec::new());
        };

        let entities = self
            .store()
            .conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, entity_set_name, label_id, label_text,
                            is_read_only, configuration_enabled
                     FROM public_entities
                     WHERE global_version_id = ?1 ORDER BY name",
                )?;
                let rows = stmt.query_map([version], entity_header_from_row)?;
                rows.map(|r| r.map(|(_, e)| e))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(entities)
    }

    pub(crate) async fn resolve_version(
        &self,
        global_version_id: Option<i64>,
    ) -> Result<Option<i64>, CacheError> {
        match global_version_id {
            Some(version) => Ok(Some(version)),
            None => self.current_global_version_id().await,
        }
    }

    async fn load_schema<F>(&self, header: F) -> Result<Option<PublicEntityInfo>, CacheError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<Option<(i64, PublicEntityInfo)>>
            + Send
            + 'static,
    {
        let entity = self
            .store()
            .conn(move |conn| {
                let Some((entity_id, mut entity)) = header(conn)? else {
                    return Ok(None);
                };
                entity.properties = load_properties(conn, entity_id)?;
                entity.navigation_properties = load_navigation_properties(conn, entity_id)?;
                entity.property_groups = load_property_groups(conn, entity_id)?;
                entity.actions = load_actions(conn, entity_id)?;
                Ok(Some(entity))
            })
            .await?;
        Ok(entity)
    }
}

fn insert_data_entities(
    tx: &Connection,
    global_version_id: i64,
    entities: &[DataEntityInfo],
) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO data_entities
         (global_version_id, name, public_entity_name, public_collection_name,
          label_id, label_text, entity_category, data_service_enabled,
          data_management_enabled, is_read_only)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for entity in entities {
        stmt.execute(rusqlite::params![
            global_version_id,
            entity.name,
            entity.public_entity_name,
            entity.public_collection_name,
            entity.label_id,
            entity.label_text,
            entity.entity_category.map(|c| c.as_str()),
            entity.data_service_enabled,
            entity.data_management_enabled,
            entity.is_read_only
        ])?;
    }
    Ok(())
}

fn data_entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DataEntityInfo> {
    let category: Option<String> = row.get(5)?;
    Ok(DataEntityInfo {
        name: row.get(0)?,
        public_entity_name: row.get(1)?,
        public_collection_name: row.get(2)?,
        label_id: row.get(3)?,
        label_text: row.get(4)?,
        entity_category: category.as_deref().and_then(EntityCategory::parse),
        data_service_enabled: row.get(6)?,
        data_management_enabled: row.get(7)?,
        is_read_only: row.get(8)?,
    })
}

type EntityHeader = (i64, PublicEntityInfo);

fn entity_header_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityHeader> {
    Ok((
        row.get(0)?,
        PublicEntityInfo {
            name: row.get(1)?,
            entity_set_name: row.get(2)?,
            label_id: row.get(3)?,
            label_text: row.get(4)?,
            is_read_only: row.get(5)?,
            configuration_enabled: row.get(6)?,
            properties: Vec::new(),
            navigation_properties: Vec::new(),
            property_groups: Vec::new(),
            actions: Vec::new(),
        },
    ))
}

fn delete_entity_children(tx: &Connection, entity_id: i64) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM relation_constraints WHERE navigation_property_id IN
         (SELECT id FROM navigation_properties WHERE entity_id = ?1)",
        [entity_id],
    )?;
    tx.execute(
        "DELETE FROM navigation_properties WHERE entity_id = ?1",
        [entity_id],
    )?;
    tx.execute(
        "DELETE FROM property_group_members WHERE group_id IN
         (SELECT id FROM property_groups WHERE entity_id = ?1)",
        [entity_id],
    )?;
    tx.execute("DELETE FROM property_groups WHERE entity_id = ?1", [entity_id])?;
    tx.execute(
        "DELETE FROM action_parameters WHERE action_id IN
         (SELECT id FROM entity_actions WHERE entity_id = ?1)",
        [entity_id],
    )?;
    tx.execute("DELETE FROM entity_actions WHERE entity_id = ?1", [entity_id])?;
    tx.execute(
        "DELETE FROM entity_properties WHERE entity_id = ?1",
        [entity_id],
    )?;
    Ok(())
}

fn insert_entity_children(
    tx: &Connection,
    entity_id: i64,
    global_version_id: i64,
    entity: &PublicEntityInfo,
) -> rusqlite::Result<()> {
    {
        let mut stmt = tx.prepare(
            "INSERT INTO entity_properties
             (entity_id, global_version_id, name, type_name, data_type, label_id,
              label_text, is_key, is_mandatory, configuration_enabled, allow_edit,
              allow_edit_on_create, is_dimension, dimension_relation, property_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        for prop in &entity.properties {
            stmt.execute(rusqlite::params![
                entity_id,
                global_version_id,
                prop.name,
                prop.type_name,
                prop.data_type,
                prop.label_id,
                prop.label_text,
                prop.is_key,
                prop.is_mandatory,
                prop.configuration_enabled,
                prop.allow_edit,
                prop.allow_edit_on_create,
                prop.is_dimension,
                prop.dimension_relation,
                prop.property_order
            ])?;
        }
    }

    for nav in &entity.navigation_properties {
        tx.execute(
            "INSERT INTO navigation_properties
             (entity_id, global_version_id, name, related_entity, cardinality)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                entity_id,
                global_version_id,
                nav.name,
                nav.related_entity,
                nav.cardinality
            ],
        )?;
        let nav_id = tx.last_insert_rowid();

        for constraint in &nav.constraints {
            let (kind, property, referenced, related, value, value_str) = match constraint {
                RelationConstraint::Referential {
                    property,
                    referenced_property,
                } => (
                    "Referential",
                    Some(property.clone()),
                    Some(referenced_property.clone()),
                    None,
                    None,
                    None,
                ),
                RelationConstraint::Fixed {
                    property,
                    value,
                    value_str,
                } => (
                    "Fixed",
                    Some(property.clone()),
                    None,
                    None,
                    *value,
                    value_str.clone(),
                ),
                RelationConstraint::RelatedFixed {
                    related_property,
                    value,
                    value_str,
                } => (
                    "RelatedFixed",
                    None,
                    None,
                    Some(related_property.clone()),
                    *value,
                    value_str.clone(),
                ),
            };
            tx.execute(
                "INSERT INTO relation_constraints
                 (navigation_property_id, global_version_id, constraint_type,
                  property_name, referenced_property, related_property,
                  fixed_value, fixed_value_str)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    nav_id,
                    global_version_id,
                    kind,
                    property,
                    referenced,
                    related,
                    value,
                    value_str
                ],
            )?;
        }
    }

    for (group_order, group) in entity.property_groups.iter().enumerate() {
        tx.execute(
            "INSERT INTO property_groups (entity_id, global_version_id, name, group_order)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![entity_id, global_version_id, group.name, group_order as i64],
        )?;
        let group_id = tx.last_insert_rowid();
        for (member_order, member) in group.properties.iter().enumerate() {
            tx.execute(
                "INSERT INTO property_group_members (group_id, property_name, member_order)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id, member, member_order as i64],
            )?;
        }
    }

    for action in &entity.actions {
        tx.execute(
            "INSERT INTO entity_actions
             (entity_id, global_version_id, name, binding_kind, entity_name,
              return_type_name, return_is_collection, return_odata_xpp_type, field_lookup)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                entity_id,
                global_version_id,
                action.name,
                action.binding_kind,
                action.entity_name,
                action.return_type.as_ref().map(|t| t.type_name.clone()),
                action.return_type.as_ref().is_some_and(|t| t.is_collection),
                action
                    .return_type
                    .as_ref()
                    .and_then(|t| t.odata_xpp_type.clone()),
                action.field_lookup
            ],
        )?;
        let action_id = tx.last_insert_rowid();

        for param in &action.parameters {
            tx.execute(
                "INSERT INTO action_parameters
                 (action_id, global_version_id, name, type_name, is_collection,
                  odata_xpp_type, parameter_order)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    action_id,
                    global_version_id,
                    param.name,
                    param.parameter_type.type_name,
                    param.parameter_type.is_collection,
                    param.parameter_type.odata_xpp_type,
                    param.parameter_order
                ],
            )?;
        }
    }

    Ok(())
}

fn load_properties(conn: &Connection, entity_id: i64) -> rusqlite::Result<Vec<PropertyInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type_name, data_type, label_id, label_text, is_key,
                is_mandatory, configuration_enabled, allow_edit, allow_edit_on_create,
                is_dimension, dimension_relation, property_order
         FROM entity_properties WHERE entity_id = ?1 ORDER BY property_order",
    )?;
    let rows = stmt.query_map([entity_id], |row| {
        Ok(PropertyInfo {
            name: row.get(0)?,
            type_name: row.get(1)?,
            data_type: row.get(2)?,
            label_id: row.get(3)?,
            label_text: row.get(4)?,
            is_key: row.get(5)?,
            is_mandatory: row.get(6)?,
            configuration_enabled: row.get(7)?,
            allow_edit: row.get(8)?,
            allow_edit_on_create: row.get(9)?,
            is_dimension: row.get(10)?,
            dimension_relation: row.get(11)?,
            property_order: row.get(12)?,
        })
    })?;
    rows.collect()
}

fn load_navigation_properties(
    conn: &Connection,
    entity_id: i64,
) -> rusqlite::Result<Vec<NavigationPropertyInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, related_entity, cardinality
         FROM navigation_properties WHERE entity_id = ?1 ORDER BY id",
    )?;
    let navs: Vec<(i64, NavigationPropertyInfo)> = stmt
        .query_map([entity_id], |row| {
            Ok((
                row.get(0)?,
                NavigationPropertyInfo {
                    name: row.get(1)?,
                    related_entity: row.get(2)?,
                    cardinality: row.get(3)?,
                    constraints: Vec::new(),
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut constraint_stmt = conn.prepare(
        "SELECT constraint_type, property_name, referenced_property,
                related_property, fixed_value, fixed_value_str
         FROM relation_constraints WHERE navigation_property_id = ?1",
    )?;

    let mut result = Vec::with_capacity(navs.len());
    for (nav_id, mut nav) in navs {
        let constraints = constraint_stmt.query_map([nav_id], |row| {
            let kind: String = row.get(0)?;
            let property: Option<String> = row.get(1)?;
            let referenced: Option<String> = row.get(2)?;
            let related: Option<String> = row.get(3)?;
            let value: Option<i64> = row.get(4)?;
            let value_str: Option<String> = row.get(5)?;
            Ok(match kind.as_str() {
                "Fixed" => RelationConstraint::Fixed {
                    property: property.unwrap_or_default(),
                    value,
                    value_str,
                },
                "RelatedFixed" => RelationConstraint::RelatedFixed {
                    related_property: related.unwrap_or_default(),
                    value,
                    value_str,
                },
                _ => RelationConstraint::Referential {
                    property: property.unwrap_or_default(),
                    referenced_property: referenced.unwrap_or_default(),
                },
            })
        })?;
        nav.constraints = constraints.collect::<rusqlite::Result<Vec<_>>>()?;
        result.push(nav);
    }
    Ok(result)
}

fn load_property_groups(
    conn: &Connection,
    entity_id: i64,
) -> rusqlite::Result<Vec<PropertyGroupInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM property_groups WHERE entity_id = ?1 ORDER BY group_order",
    )?;
    let groups: Vec<(i64, String)> = stmt
        .query_map([entity_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut member_stmt = conn.prepare(
        "SELECT property_name FROM property_group_members
         WHERE group_id = ?1 ORDER BY member_order",
    )?;

    let mut result = Vec::with_capacity(groups.len());
    for (group_id, name) in groups {
        let members = member_stmt
            .query_map([group_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        result.push(PropertyGroupInfo {
            name,
            properties: members,
        });
    }
    Ok(result)
}

fn load_actions(conn: &Connection, entity_id: i64) -> rusqlite::Result<Vec<ActionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, binding_kind, entity_name, return_type_name,
                return_is_collection, return_odata_xpp_type, field_lookup
         FROM entity_actions WHERE entity_id = ?1 ORDER BY id",
    )?;
    let actions: Vec<(i64, ActionInfo)> = stmt
        .query_map([entity_id], |row| {
            let return_type_name: Option<String> = row.get(4)?;
            let return_type = return_type_name.map(|type_name| ActionTypeInfo {
                type_name,
                is_collection: row.get(5).unwrap_or(false),
                odata_xpp_type: row.get(6).unwrap_or(None),
            });
            Ok((
                row.get(0)?,
                ActionInfo {
                    name: row.get(1)?,
                    binding_kind: row.get(2)?,
                    entity_name: row.get(3)?,
                    parameters: Vec::new(),
                    return_type,
                    field_lookup: row.get(7)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut param_stmt = conn.prepare(
        "SELECT name, type_name, is_collection, odata_xpp_type, parameter_order
         FROM action_parameters WHERE action_id = ?1 ORDER BY parameter_order",
    )?;

    let mut result = Vec::with_capacity(actions.len());
    for (action_id, mut action) in actions {
        let params = param_stmt.query_map([action_id], |row| {
            Ok(ActionParameterInfo {
                name: row.get(0)?,
                parameter_type: ActionTypeInfo {
                    type_name: row.get(1)?,
                    is_collection: row.get(2)?,
                    odata_xpp_type: row.get(3)?,
                },
                parameter_order: row.get(4)?,
            })
        })?;
        action.parameters = params.collect::<rusqlite::Result<Vec<_>>>()?;
        result.push(action);
    }
    Ok(result)
}
