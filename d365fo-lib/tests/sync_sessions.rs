//! Sync session manager and client guard integration tests.
//!
//! These tests run fully offline: the HTTP session points at a closed
//! port with retries disabled, so any accidental network call fails fast
//! and loudly.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use d365fo_lib::D365Client;
use d365fo_lib::FOClientConfig;
use d365fo_lib::api::labels::LabelOperations;
use d365fo_lib::api::metadata::MetadataApi;
use d365fo_lib::auth::StaticTokenProvider;
use d365fo_lib::auth::TokenProvider;
use d365fo_lib::cache::DataEntityFilter;
use d365fo_lib::cache::MetadataCache;
use d365fo_lib::error::ApiError;
use d365fo_lib::error::Error;
use d365fo_lib::http::HttpSession;
use d365fo_lib::http::RetryConfig;
use d365fo_lib::http::SessionOptions;
use d365fo_lib::model::DataEntityInfo;
use d365fo_lib::model::EntityCategory;
use d365fo_lib::model::EntityKey;
use d365fo_lib::model::ModuleVersionInfo;
use d365fo_lib::model::PropertyInfo;
use d365fo_lib::model::PublicEntityInfo;
use d365fo_lib::model::SyncCounts;
use d365fo_lib::sync::SyncSessionManager;
use d365fo_lib::sync::SyncSessionSummary;
use d365fo_lib::sync::SyncStatus;
use d365fo_lib::sync::SyncStrategy;

const UNREACHABLE: &str = "https://127.0.0.1:9";

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
        label_id: None,
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

fn schema(name: &str, set_name: &str, read_only: bool) -> PublicEntityInfo {
    PublicEntityInfo {
        name: name.to_string(),
        entity_set_name: set_name.to_string(),
        label_id: None,
        label_text: None,
        is_read_only: read_only,
        configuration_enabled: true,
        properties: vec![
            property("dataAreaId", "String", true, 1),
            property("AccountNum", "String", true, 2),
        ],
        navigation_properties: Vec::new(),
        property_groups: Vec::new(),
        actions: Vec::new(),
    }
}

fn offline_session_options() -> SessionOptions {
    SessionOptions {
        timeout: Duration::from_secs(2),
        verify_ssl: true,
        retry: RetryConfig::no_retry(),
        max_concurrent_requests: 4,
    }
}

fn test_manager(cache: Arc<MetadataCache>) -> SyncSessionManager {
    let provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("test-token"));
    let session = Arc::new(
        HttpSession::new(UNREACHABLE, provider, offline_session_options()).expect("session"),
    );
    let api = Arc::new(MetadataApi::new(session));
    let labels = Arc::new(LabelOperations::new(
        api.clone(),
        Some(cache.clone()),
        Duration::from_secs(3600),
    ));
    SyncSessionManager::new(cache, api, labels, "en-US")
}

async fn wait_for_terminal(
    manager: &SyncSessionManager,
    session_id: uuid::Uuid,
) -> SyncSessionSummary {
    for _ in 0..500 {
        let history = manager.get_session_history(100).await;
        if let Some(summary) = history.iter().find(|s| s.session_id == session_id) {
            return summary.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} did not reach a terminal state", session_id);
}

// Sharing mode populates a new version by copying a compatible completed
// version's rows, with no network fetches.
#[tokio::test]
async fn test_sharing_mode_sync_copies_rows() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let modules = vec![module("mA", "1.0"), module("mB", "2.0")];

    let (v1, _) = manager
        .register_environment_version(cache.environment_id(), &modules, None, None, None)
        .await
        .unwrap();
    cache
        .store_data_entities(
            v1,
            &[data_entity("Customer"), data_entity("Vendor"), data_entity("Invoice")],
        )
        .await
        .unwrap();
    cache
        .store_public_entity_schema(v1, &schema("Customer", "Customers", false))
        .await
        .unwrap();
    cache
        .mark_sync_completed(
            v1,
            SyncCounts {
                entity_count: 3,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(cache.has_complete_metadata(v1).await.unwrap());

    // A second version with the identical module set but a hash written by
    // an older format.
    let v2 = manager
        .import_version(&modules, None, None, None, "legacy0000000002")
        .await
        .unwrap();

    let sync = test_manager(cache.clone());
    assert_eq!(
        sync.recommend_strategy(v2).await.unwrap(),
        SyncStrategy::SharingMode
    );

    let session_id = sync
        .start_sync_session(v2, SyncStrategy::SharingMode, "test")
        .await
        .unwrap();

    let snapshots: Arc<Mutex<Vec<(f64, Option<i64>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = snapshots.clone();
    sync.add_progress_callback(
        session_id,
        Arc::new(move |session| {
            let entity_count = session.result.as_ref().map(|r| r.entity_count);
            if let Ok(mut snapshots) = sink.lock() {
                snapshots.push((session.progress_percent, entity_count));
            }
        }),
    )
    .await;

    let summary = wait_for_terminal(&sync, session_id).await;
    assert_eq!(summary.status, SyncStatus::Completed);

    // Progress is monotonically non-decreasing under successful execution.
    let snapshots = snapshots.lock().unwrap();
    let percents: Vec<f64> = snapshots.iter().map(|(p, _)| *p).collect();
    assert!(percents.windows(2).all(|w| w[1] >= w[0]), "progress regressed: {:?}", percents);

    // The final snapshot carries the copy counts.
    let final_count = snapshots.iter().rev().find_map(|(_, c)| *c);
    assert_eq!(final_count, Some(3));

    let copied = cache
        .get_data_entities(Some(v2), &DataEntityFilter::default())
        .await
        .unwrap();
    assert_eq!(copied.len(), 3);
    assert!(cache.has_complete_metadata(v2).await.unwrap());
}

#[tokio::test]
async fn test_recommend_strategy_prefers_existing_metadata() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let sync = test_manager(cache.clone());

    // Nothing cached anywhere: full sync.
    assert_eq!(sync.recommend_strategy(version).await.unwrap(), SyncStrategy::Full);

    // Complete metadata for the version itself: incremental.
    cache
        .store_data_entities(version, &[data_entity("Customer")])
        .await
        .unwrap();
    cache
        .mark_sync_completed(
            version,
            SyncCounts {
                entity_count: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        sync.recommend_strategy(version).await.unwrap(),
        SyncStrategy::Incremental
    );
}

// Cancelling a non-terminal session transitions it to Cancelled; cancelling
// again (now terminal) returns false.
#[tokio::test]
async fn test_cancel_sync_session() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let sync = test_manager(cache.clone());
    let session_id = sync
        .start_sync_session(version, SyncStrategy::Full, "test")
        .await
        .unwrap();

    assert!(sync.cancel_sync_session(session_id).await);
    assert!(!sync.cancel_sync_session(session_id).await);

    let summary = wait_for_terminal(&sync, session_id).await;
    assert_eq!(summary.status, SyncStatus::Cancelled);
    assert!(!cache.has_complete_metadata(version).await.unwrap());
}

#[tokio::test]
async fn test_unknown_session_cannot_be_cancelled() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let sync = test_manager(cache);
    assert!(!sync.cancel_sync_session(uuid::Uuid::new_v4()).await);
}

// A required phase failing (entities fetch against a closed port) fails
// the session and records the failed status on the version link.
#[tokio::test]
async fn test_required_phase_failure_fails_session() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let env = cache.environment_id();
    let (version, _) = manager
        .register_environment_version(env, &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();

    let sync = test_manager(cache.clone());
    let session_id = sync
        .start_sync_session(version, SyncStrategy::EntitiesOnly, "test")
        .await
        .unwrap();

    let summary = wait_for_terminal(&sync, session_id).await;
    assert_eq!(summary.status, SyncStatus::Failed);

    let link = manager.get_environment_version_info(env).await.unwrap().unwrap();
    assert_eq!(
        link.last_sync_status,
        d365fo_lib::model::VersionSyncStatus::Failed
    );
    assert!(!cache.has_complete_metadata(version).await.unwrap());
}

async fn offline_client(cache: Arc<MetadataCache>) -> D365Client {
    let mut config = FOClientConfig::new(UNREACHABLE);
    config.timeout = Duration::from_secs(2);
    config.retry = RetryConfig::no_retry();
    D365Client::builder()
        .config(config)
        .token_provider(StaticTokenProvider::new("test-token"))
        .metadata_cache(cache)
        .build()
        .await
        .expect("client")
}

// A cached read-only schema blocks the write before any HTTP request.
#[tokio::test]
async fn test_read_only_entity_guard() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();
    cache
        .store_public_entity_schema(version, &schema("Company", "Companies", true))
        .await
        .unwrap();

    let client = offline_client(cache).await;
    let err = client
        .create_entity("Companies", serde_json::json!({"Name": "Contoso"}))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Api(ApiError::ReadOnlyEntity { .. })),
        "expected ReadOnlyEntity, got {:?}",
        err
    );
}

// A composite key with the wrong field count is rejected before any HTTP
// request when the schema is cached.
#[tokio::test]
async fn test_key_cardinality_guard() {
    let cache = Arc::new(
        MetadataCache::open_in_memory("https://env1.example.com")
            .await
            .unwrap(),
    );
    let manager = cache.version_manager();
    let (version, _) = manager
        .register_environment_version(cache.environment_id(), &[module("mA", "1.0")], None, None, None)
        .await
        .unwrap();
    cache
        .store_public_entity_schema(version, &schema("Customer", "Customers", false))
        .await
        .unwrap();

    let client = offline_client(cache).await;
    let key = EntityKey::composite([("AccountNum", "C1")]);
    let err = client
        .get_entity_by_key("Customers", &key, None)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::Api(ApiError::KeyMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ),
        "expected KeyMismatch, got {:?}",
        err
    );
}
