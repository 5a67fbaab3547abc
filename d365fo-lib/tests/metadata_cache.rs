//! Metadata cache and global version manager integration tests.

use std::sync::Arc;
use std::time::Duration;

use d365fo_lib::cache::DataEntityFilter;
use d365fo_lib::cache::MetadataCache;
use d365fo_lib::model::ActionInfo;
use d365fo_lib::model::ActionParameterInfo;
use d365fo_lib::model::ActionTypeInfo;
use d365fo_lib::model::DataEntityInfo;
use d365fo_lib::model::EntityCategory;
use d365fo_lib::model::EnumerationInfo;
use d365fo_lib::model::EnumerationMemberInfo;
use d365fo_lib::model::MetadataType;
use d365fo_lib::model::ModuleVersionInfo;
use d365fo_lib::model::NavigationPropertyInfo;
use d365fo_lib::model::PropertyGroupInfo;
use d365fo_lib::model::PropertyInfo;
use d365fo_lib::model::PublicEntityInfo;
use d365fo_lib::model::RelationConstraint;
use d365fo_lib::model::SearchQuery;
use d365fo_lib::model::SyncCounts;
use d365fo_lib::model::VersionSyncStatus;

fn module(id: &str, version: &str) -> ModuleVersionInfo {
    ModuleVersionInfo {
        module_id: id.to_string(),
        name: id.to_string(),
        version: version.to_string(),
        publisher: "Microsoft Corporation".to_string(),
        display_name: id.to_string(),
    }
}

fn data_entity(name: &str) -> DataEntityInfo {
    DataEntityInfo {
        name: name.to_string(),
        public_entity_name: name.to_string(),
        public_collection_name: format!("{}s", name),
        label_id: Some(format!("@SYS{}", name.len())),
        label_text: None,
        data_service_enabled: true,
        data_management_enabled: true,
        entity_category: Some(EntityCategory::Master),
        is_read_only: false,
    }
}

fn property(name: &str, data_type: &str, is_key: bool, order: i32) -> PropertyInfo {
    PropertyInfo {
        name: name.to_string(),
        type_name: format!("Edm.{}", data_type),
        data_type: data_type.to_string(),
        label_id: None,
        label_text: None,
        is_key,
        is_mandatory: is_key,
        configuration_enabled: true,
        allow_edit: !is_key,
        allow_edit_on_create: true,
        is_dimension: false,
        dimension_relation: None,
        property_order: order,
    }
}

fn customer_schema() -> PublicEntityInfo {
    PublicEntityInfo {
        name: "Customer".to_string(),
        entity_set_name: "Customers".to_string(),
        label_id: Some("@SYS100".to_string()),
        label_text: None,
        is_read_only: false,
        configuration_enabled: true,
        properties: vec![
            property("dataAreaId", "String", true, 1),
            property("CustomerAccount", "String", true, 2),
            property("CreditLimit", "Real", false, 3),
        ],
        navigation_properties: vec![NavigationPropertyInfo {
            name: "CustomerGroup".to_string(),
            related_entity: "CustomerGroup".to_string(),
            cardinality: "Single".to_string(),
            constraints: vec![
                RelationConstraint::Referential {
                    property: "CustomerGroupId".to_string(),
                    referenced_property: "GroupId".to_string(),
                },
                RelationConstraint::Fixed {
                    property: "IsActive".to_string(),
                    value: Some(1),
                    value_str: None,
                },
            ],
        }],
        property_groups: vec![PropertyGroupInfo {
            name: "Identification".to_string(),
            properties: vec!["dataAreaId".to_string(), "CustomerAccount".to_string()],
        }],
        actions: vec![ActionInfo {
            name: "calculateBalance".to_string(),
            binding_kind: "BoundToEntityInstance".to_string(),
            entity_name: Some("Customer".to_string()),
            parameters: vec![ActionParameterInfo {
                name: "asOfDate".to_string(),
                parameter_type: ActionTypeInfo {
                    type_name: "Edm.Date".to_string(),
                    is_collection: false,
                    odata_xpp_type: Some("Date".to_string()),
                },
                parameter_order: 1,
            }],
            return_type: Some(ActionTypeInfo {
                type_name: "Edm.Decimal".to_string(),
                is_collection: false,
                odata_xpp_type: Some("Real".to_string()),
            }),
            field_lookup: None,
        }],
    }
}

async fn open_cache() -> Arc<MetadataCache> {
    Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .expect("in-memory cache"),
    )
}

// Two environments registering the same module list share one global
// version whose reference count equals the number of environments.
#[tokio::test]
async fn test_global_version_deduplication() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let modules = vec![module("mA", "1.0"), module("mB", "2.0")];

    let env_a = cache.environment_id();
    let env_b = cache
        .register_environment("https://env2.example.com")
        .await
        .unwrap();
    assert_ne!(env_a, env_b);

    let (v_a, new_a) = manager
        .register_environment_version(env_a, &modules, None, None, None)
        .await
        .unwrap();
    let (v_b, new_b) = manager
        .register_environment_version(env_b, &modules, None, None, None)
        .await
        .unwrap();

    assert_eq!(v_a, v_b);
    assert!(new_a);
    assert!(!new_b);

    let info = manager.get_global_version_info(v_a).await.unwrap().unwrap();
    assert_eq!(info.reference_count, 2);
    assert_eq!(info.modules.len(), 2);

    let link_a = manager.get_environment_version_info(env_a).await.unwrap().unwrap();
    let link_b = manager.get_environment_version_info(env_b).await.unwrap().unwrap();
    assert_eq!(link_a.global_version_id, v_a);
    assert_eq!(link_b.global_version_id, v_a);
}

#[tokio::test]
async fn test_reference_count_follows_environment_moves() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let env = cache.environment_id();

    let (v1, _) = manager
        .register_environment_version(env, &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();
    let (v2, _) = manager
        .register_environment_version(env, &[module("mA", "1.1")], None, None, None)
        .await
        .unwrap();
    assert_ne!(v1, v2);

    let old = manager.get_global_version_info(v1).await.unwrap().unwrap();
    let new = manager.get_global_version_info(v2).await.unwrap().unwrap();
    assert_eq!(old.reference_count, 0);
    assert_eq!(new.reference_count, 1);

    // Re-registering the same version must not inflate the count.
    manager
        .register_environment_version(env, &[module("mA", "1.1")], None, None, None)
        .await
        .unwrap();
    let again = manager.get_global_version_info(v2).await.unwrap().unwrap();
    assert_eq!(again.reference_count, 1);
}

#[tokio::test]
async fn test_find_compatible_versions() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let env = cache.environment_id();

    let small = vec![module("mA", "1.0")];
    let large = vec![module("mA", "1.0"), module("mB", "2.0")];
    let (v_large, _) = manager
        .register_environment_version(env, &large, None, None, None)
        .await
        .unwrap();

    // Superset match finds the larger version; exact match does not.
    let superset = manager.find_compatible_versions(&small, false).await.unwrap();
    assert!(superset.iter().any(|v| v.id == v_large));
    let exact = manager.find_compatible_versions(&small, true).await.unwrap();
    assert!(exact.is_empty());

    let exact = manager.find_compatible_versions(&large, true).await.unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, v_large);
}

// store_data_entities replaces, never unions.
#[tokio::test]
async fn test_data_entity_replacement() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let first = vec![data_entity("Customer"), data_entity("Vendor")];
    cache.store_data_entities(version, &first).await.unwrap();

    let stored = cache
        .get_data_entities(Some(version), &DataEntityFilter::default())
        .await
        .unwrap();
    let names: Vec<_> = stored.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Customer", "Vendor"]);

    let second = vec![data_entity("Invoice")];
    cache.store_data_entities(version, &second).await.unwrap();

    let stored = cache
        .get_data_entities(Some(version), &DataEntityFilter::default())
        .await
        .unwrap();
    let names: Vec<_> = stored.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Invoice"]);
}

#[tokio::test]
async fn test_data_entity_filters() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let mut transaction = data_entity("SalesOrder");
    transaction.entity_category = Some(EntityCategory::Transaction);
    transaction.data_service_enabled = false;
    cache
        .store_data_entities(version, &[data_entity("Customer"), transaction])
        .await
        .unwrap();

    let filter = DataEntityFilter {
        entity_category: Some(EntityCategory::Transaction),
        ..Default::default()
    };
    let stored = cache.get_data_entities(Some(version), &filter).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "SalesOrder");

    let filter = DataEntityFilter {
        data_service_enabled: Some(true),
        name_pattern: Some("%Cust%".to_string()),
        ..Default::default()
    };
    let stored = cache.get_data_entities(Some(version), &filter).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Customer");
}

#[tokio::test]
async fn test_schema_roundtrip_and_upsert() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let schema = customer_schema();
    cache.store_public_entity_schema(version, &schema).await.unwrap();

    let loaded = cache
        .get_public_entity_schema("Customer", Some(version))
        .await
        .unwrap()
        .expect("schema stored");
    assert_eq!(loaded.entity_set_name, "Customers");
    assert_eq!(loaded.properties.len(), 3);
    assert_eq!(loaded.navigation_properties.len(), 1);
    assert_eq!(loaded.navigation_properties[0].constraints.len(), 2);
    assert_eq!(loaded.property_groups.len(), 1);
    assert_eq!(loaded.actions.len(), 1);
    assert_eq!(loaded.actions[0].parameters.len(), 1);

    // Key order must match property_order.
    let keys: Vec<_> = loaded.key_properties().iter().map(|p| p.name.clone()).collect();
    assert_eq!(keys, vec!["dataAreaId", "CustomerAccount"]);

    // Upsert wipes and rewrites children, never accumulates.
    let mut updated = customer_schema();
    updated.properties.pop();
    updated.actions.clear();
    cache.store_public_entity_schema(version, &updated).await.unwrap();

    let loaded = cache
        .get_public_entity_schema("Customer", Some(version))
        .await
        .unwrap()
        .expect("schema stored");
    assert_eq!(loaded.properties.len(), 2);
    assert!(loaded.actions.is_empty());

    let by_set = cache
        .get_public_entity_schema_by_set_name("Customers", Some(version))
        .await
        .unwrap()
        .expect("lookup by set name");
    assert_eq!(by_set.name, "Customer");
}

#[tokio::test]
async fn test_enumeration_roundtrip() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let enums = vec![EnumerationInfo {
        name: "NoYes".to_string(),
        label_id: Some("@SYS1".to_string()),
        label_text: None,
        members: vec![
            EnumerationMemberInfo {
                name: "No".to_string(),
                value: 0,
                label_id: None,
                label_text: None,
                configuration_enabled: true,
                member_order: 1,
            },
            EnumerationMemberInfo {
                name: "Yes".to_string(),
                value: 1,
                label_id: None,
                label_text: None,
                configuration_enabled: true,
                member_order: 2,
            },
        ],
    }];
    cache.store_enumerations(version, &enums).await.unwrap();

    let loaded = cache
        .get_enumeration_info("NoYes", Some(version))
        .await
        .unwrap()
        .expect("enumeration stored");
    assert_eq!(loaded.members.len(), 2);
    assert_eq!(loaded.members[0].name, "No");
    assert_eq!(loaded.members[1].value, 1);

    assert!(cache
        .get_enumeration_info("Missing", Some(version))
        .await
        .unwrap()
        .is_none());
}

// Completeness requires both a completed sync record and actual rows.
#[tokio::test]
async fn test_completeness_check() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    assert!(!cache.has_complete_metadata(version).await.unwrap());

    // Completed sync but no rows: still incomplete.
    cache
        .mark_sync_completed(version, SyncCounts::default())
        .await
        .unwrap();
    assert!(!cache.has_complete_metadata(version).await.unwrap());

    cache
        .store_data_entities(version, &[data_entity("Customer")])
        .await
        .unwrap();
    assert!(cache.has_complete_metadata(version).await.unwrap());
}

#[tokio::test]
async fn test_label_cache_ttl() {
    let cache = open_cache().await;

    cache
        .set_label("@SYS1", "en-US", "Customer", Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(
        cache.get_label("@SYS1", "en-US").await.unwrap(),
        Some("Customer".to_string())
    );
    assert_eq!(cache.get_label("@SYS1", "de-DE").await.unwrap(), None);

    // Zero TTL rows are expired immediately and ignored on read.
    cache
        .set_label("@SYS2", "en-US", "Vendor", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(cache.get_label("@SYS2", "en-US").await.unwrap(), None);

    let swept = cache.sweep_expired_labels().await.unwrap();
    assert_eq!(swept, 1);

    let ids = vec!["@SYS1".to_string(), "@SYS2".to_string()];
    let batch = cache.get_labels_batch(&ids, "en-US").await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.get("@SYS1").map(String::as_str), Some("Customer"));
}

#[tokio::test]
async fn test_collect_label_ids() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    cache
        .store_data_entities(version, &[data_entity("Customer")])
        .await
        .unwrap();
    cache
        .store_public_entity_schema(version, &customer_schema())
        .await
        .unwrap();

    let mut ids = cache.collect_label_ids(version).await.unwrap();
    ids.sort();
    assert!(ids.contains(&"@SYS100".to_string()));
    assert!(ids.contains(&"@SYS8".to_string()));
}

#[tokio::test]
async fn test_search_after_rebuild() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    cache
        .store_data_entities(version, &[data_entity("CustomerGroup"), data_entity("Vendor")])
        .await
        .unwrap();
    cache
        .store_public_entity_schema(version, &customer_schema())
        .await
        .unwrap();
    cache.rebuild_search_index(version).await.unwrap();

    let results = cache
        .search(&SearchQuery::new("Customer"), Some(version))
        .await
        .unwrap();
    assert!(results.total_count >= 2);
    assert!(results.results.iter().any(|r| r.name == "CustomerGroup"));
    assert!(results.results.iter().any(|r| r.name == "Customer"));

    let only_schemas = cache
        .search(
            &SearchQuery::new("Customer").entity_types(vec![MetadataType::PublicEntity]),
            Some(version),
        )
        .await
        .unwrap();
    assert!(only_schemas
        .results
        .iter()
        .all(|r| r.entity_type == MetadataType::PublicEntity));

    // Rebuild is idempotent: no duplicate rows.
    cache.rebuild_search_index(version).await.unwrap();
    let again = cache
        .search(&SearchQuery::new("Vendor"), Some(version))
        .await
        .unwrap();
    assert_eq!(again.total_count, 1);
}

#[tokio::test]
async fn test_copy_version_metadata() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let modules = vec![module("mA", "1.0")];
    let (source, _) = manager
        .register_environment_version(cache.environment_id(), &modules, None, None, None)
        .await
        .unwrap();

    cache
        .store_data_entities(
            source,
            &[data_entity("Customer"), data_entity("Vendor"), data_entity("Invoice")],
        )
        .await
        .unwrap();
    cache
        .store_public_entity_schema(source, &customer_schema())
        .await
        .unwrap();

    let target = manager
        .import_version(&modules, None, None, None, "legacy0000000001")
        .await
        .unwrap();

    let counts = cache.copy_version_metadata(source, target).await.unwrap();
    assert_eq!(counts.entity_count, 3);
    assert_eq!(counts.action_count, 1);

    let copied = cache
        .get_data_entities(Some(target), &DataEntityFilter::default())
        .await
        .unwrap();
    assert_eq!(copied.len(), 3);

    let schema = cache
        .get_public_entity_schema("Customer", Some(target))
        .await
        .unwrap()
        .expect("schema copied");
    assert_eq!(schema.properties.len(), 3);
    assert_eq!(schema.navigation_properties[0].constraints.len(), 2);
    assert_eq!(schema.actions[0].parameters.len(), 1);
}

#[tokio::test]
async fn test_sync_status_updates() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let env = cache.environment_id();
    let (version, _) = manager
        .register_environment_version(env, &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let link = manager.get_environment_version_info(env).await.unwrap().unwrap();
    assert_eq!(link.last_sync_status, VersionSyncStatus::Pending);

    manager
        .update_sync_status(env, version, VersionSyncStatus::Completed, Some(1234))
        .await
        .unwrap();
    let link = manager.get_environment_version_info(env).await.unwrap().unwrap();
    assert_eq!(link.last_sync_status, VersionSyncStatus::Completed);
    assert_eq!(link.last_sync_duration_ms, Some(1234));
}

// All three detected version strings are persisted with the global version.
#[tokio::test]
async fn test_version_strings_roundtrip() {
    let cache = open_cache().await;
    let manager = cache.version_manager();

    let (version, _) = manager
        .register_environment_version(
            cache.environment_id(),
            &[module("mA", "1.0")],
            Some("10.0.38".to_string()),
            Some("7.0.7120.59".to_string()),
            Some("10.0.1985.137".to_string()),
        )
        .await
        .unwrap();

    let info = manager.get_global_version_info(version).await.unwrap().unwrap();
    assert_eq!(info.application_version.as_deref(), Some("10.0.38"));
    assert_eq!(info.platform_version.as_deref(), Some("7.0.7120.59"));
    assert_eq!(
        info.application_build_version.as_deref(),
        Some("10.0.1985.137")
    );
}

#[tokio::test]
async fn test_version_statistics() {
    let cache = open_cache().await;
    let manager = cache.version_manager();
    let modules = vec![module("mA", "1.0"), module("mB", "2.0")];

    let env_a = cache.environment_id();
    let env_b = cache
        .register_environment("https://env2.example.com")
        .await
        .unwrap();
    manager
        .register_environment_version(env_a, &modules, None, None, None)
        .await
        .unwrap();
    manager
        .register_environment_version(env_b, &modules, None, None, None)
        .await
        .unwrap();

    let stats = manager.get_version_statistics().await.unwrap();
    assert_eq!(stats.global_version_count, 1);
    assert_eq!(stats.environment_count, 2);
    assert_eq!(stats.linked_environment_count, 2);
    assert_eq!(stats.shared_version_count, 1);
    assert_eq!(stats.total_module_count, 2);
}
