//! Cross-version metadata copy.
//!
//! When a new global version has the same module set as an already-synced
//! one, its rows are populated with `INSERT…SELECT` instead of re-fetching
//! from the remote. Child tables are re-parented by joining source and
//! target parents on name, since parent row IDs differ between versions.

use async_sqlite::rusqlite::Connection;
use async_sqlite::rusqlite::params;
use tracing::info;

use super::MetadataCache;
use crate::error::CacheError;
use crate::model::SyncCounts;

impl MetadataCache {
    /// Copies all metadata rows from `source_version_id` to
    /// `target_version_id` in one transaction, replacing anything already
    /// stored for the target.
    pub async fn copy_version_metadata(
        &self,
        source_version_id: i64,
        target_version_id: i64,
    ) -> Result<SyncCounts, CacheError> {
        let counts = self
            .store()
            .conn_mut(move |conn| {
                let tx = conn.transaction()?;

                clear_version_rows(&tx, target_version_id)?;

                let entity_count = tx.execute(
                    "INSERT INTO data_entities
                     (global_version_id, name, public_entity_name, public_collection_name,
                      label_id, label_text, entity_category, data_service_enabled,
                      data_management_enabled, is_read_only)
                     SELECT ?1, name, public_entity_name, public_collection_name,
                            label_id, label_text, entity_category, data_service_enabled,
                            data_management_enabled, is_read_only
                     FROM data_entities WHERE global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )? as i64;

                tx.execute(
                    "INSERT INTO public_entities
                     (global_version_id, name, entity_set_name, label_id, label_text,
                      is_read_only, configuration_enabled)
                     SELECT ?1, name, entity_set_name, label_id, label_text,
                            is_read_only, configuration_enabled
                     FROM public_entities WHERE global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.execute(
                    "INSERT INTO entity_properties
                     (entity_id, global_version_id, name, type_name, data_type, label_id,
                      label_text, is_key, is_mandatory, configuration_enabled, allow_edit,
                      allow_edit_on_create, is_dimension, dimension_relation, property_order)
                     SELECT ne.id, ?1, p.name, p.type_name, p.data_type, p.label_id,
                            p.label_text, p.is_key, p.is_mandatory, p.configuration_enabled,
                            p.allow_edit, p.allow_edit_on_create, p.is_dimension,
                            p.dimension_relation, p.property_order
                     FROM entity_properties p
                     JOIN public_entities oe ON oe.id = p.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     WHERE p.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.execute(
                    "INSERT INTO navigation_properties
                     (entity_id, global_version_id, name, related_entity, cardinality)
                     SELECT ne.id, ?1, n.name, n.related_entity, n.cardinality
                     FROM navigation_properties n
                     JOIN public_entities oe ON oe.id = n.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     WHERE n.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.execute(
                    "INSERT INTO relation_constraints
                     (navigation_property_id, global_version_id, constraint_type,
                      property_name, referenced_property, related_property,
                      fixed_value, fixed_value_str)
                     SELECT nn.id, ?1, c.constraint_type, c.property_name,
                            c.referenced_property, c.related_property,
                            c.fixed_value, c.fixed_value_str
                     FROM relation_constraints c
                     JOIN navigation_properties onp ON onp.id = c.navigation_property_id
                     JOIN public_entities oe ON oe.id = onp.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     JOIN navigation_properties nn
                          ON nn.entity_id = ne.id AND nn.name = onp.name
                     WHERE c.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.execute(
                    "INSERT INTO property_groups
                     (entity_id, global_version_id, name, group_order)
                     SELECT ne.id, ?1, g.name, g.group_order
                     FROM property_groups g
                     JOIN public_entities oe ON oe.id = g.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     WHERE g.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.execute(
                    "INSERT INTO property_group_members (group_id, property_name, member_order)
                     SELECT ng.id, m.property_name, m.member_order
                     FROM property_group_members m
                     JOIN property_groups og ON og.id = m.group_id
                     JOIN public_entities oe ON oe.id = og.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     JOIN property_groups ng ON ng.entity_id = ne.id AND ng.name = og.name
                     WHERE og.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                let action_count = tx.execute(
                    "INSERT INTO entity_actions
                     (entity_id, global_version_id, name, binding_kind, entity_name,
                      return_type_name, return_is_collection, return_odata_xpp_type,
                      field_lookup)
                     SELECT ne.id, ?1, a.name, a.binding_kind, a.entity_name,
                            a.return_type_name, a.return_is_collection,
                            a.return_odata_xpp_type, a.field_lookup
                     FROM entity_actions a
                     JOIN public_entities oe ON oe.id = a.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     WHERE a.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )? as i64;

                tx.execute(
                    "INSERT INTO action_parameters
                     (action_id, global_version_id, name, type_name, is_collection,
                      odata_xpp_type, parameter_order)
                     SELECT na.id, ?1, p.name, p.type_name, p.is_collection,
                            p.odata_xpp_type, p.parameter_order
                     FROM action_parameters p
                     JOIN entity_actions oa ON oa.id = p.action_id
                     JOIN public_entities oe ON oe.id = oa.entity_id
                     JOIN public_entities ne
                          ON ne.global_version_id = ?1 AND ne.name = oe.name
                     JOIN entity_actions na ON na.entity_id = ne.id AND na.name = oa.name
                     WHERE p.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                let enumeration_count = tx.execute(
                    "INSERT INTO enumerations
                     (global_version_id, name, label_id, label_text)
                     SELECT ?1, name, label_id, label_text
                     FROM enumerations WHERE global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )? as i64;

                tx.execute(
                    "INSERT INTO enumeration_members
                     (enumeration_id, global_version_id, name, value, label_id,
                      label_text, configuration_enabled, member_order)
                     SELECT nen.id, ?1, m.name, m.value, m.label_id,
                            m.label_text, m.configuration_enabled, m.member_order
                     FROM enumeration_members m
                     JOIN enumerations oen ON oen.id = m.enumeration_id
                     JOIN enumerations nen
                          ON nen.global_version_id = ?1 AND nen.name = oen.name
                     WHERE m.global_version_id = ?2",
                    params![target_version_id, source_version_id],
                )?;

                tx.commit()?;

                Ok(SyncCounts {
                    entity_count,
                    action_count,
                    enumeration_count,
                    label_count: 0,
                })
            })
            .await?;

        info!(
            source_version_id,
            target_version_id,
            entities = counts.entity_count,
            "copied metadata between versions"
        );
        Ok(counts)
    }
}

fn clear_version_rows(tx: &Connection, version: i64) -> async_sqlite::rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM action_parameters WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM entity_actions WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM property_group_members WHERE group_id IN
         (SELECT id FROM property_groups WHERE global_version_id = ?1)",
        [version],
    )?;
    tx.execute(
        "DELETE FROM property_groups WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM relation_constraints WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM navigation_properties WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM entity_properties WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM public_entities WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM enumeration_members WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM enumerations WHERE global_version_id = ?1",
        [version],
    )?;
    tx.execute(
        "DELETE FROM data_entities WHERE global_version_id = ?1",
        [version],
    )?;
    Ok(())
}
