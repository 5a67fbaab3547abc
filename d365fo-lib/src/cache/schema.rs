//! Metadata store schema.

use async_sqlite::Client;
use async_sqlite::rusqlite;

/// DDL for all base tables.
///
/// Every metadata table is keyed by `global_version_id` so environments with
/// identical module sets share one copy of the catalog.
pub(crate) const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_url TEXT NOT NULL UNIQUE,
    display_name TEXT,
    created_at TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS global_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_hash TEXT NOT NULL UNIQUE,
    application_version TEXT,
    platform_version TEXT,
    application_build_version TEXT,
    reference_count INTEGER NOT NULL DEFAULT 0,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS global_version_modules (
    global_version_id INTEGER NOT NULL REFERENCES global_versions(id),
    module_id TEXT NOT NULL,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    publisher TEXT NOT NULL DEFAULT '',
    display_name TEXT NOT NULL DEFAULT '',
    module_order INTEGER NOT NULL,
    PRIMARY KEY (global_version_id, module_id, version)
);

CREATE TABLE IF NOT EXISTS environment_versions (
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    global_version_id INTEGER NOT NULL REFERENCES global_versions(id),
    is_current INTEGER NOT NULL DEFAULT 1,
    last_sync_status TEXT NOT NULL DEFAULT 'pending',
    last_sync_duration_ms INTEGER,
    linked_at TEXT NOT NULL,
    PRIMARY KEY (environment_id, global_version_id)
);

CREATE TABLE IF NOT EXISTS metadata_versions (
    global_version_id INTEGER PRIMARY KEY REFERENCES global_versions(id),
    sync_completed_at TEXT,
    entity_count INTEGER NOT NULL DEFAULT 0,
    action_count INTEGER NOT NULL DEFAULT 0,
    enumeration_count INTEGER NOT NULL DEFAULT 0,
    label_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS data_entities (
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    public_entity_name TEXT NOT NULL DEFAULT '',
    public_collection_name TEXT NOT NULL DEFAULT '',
    label_id TEXT,
    label_text TEXT,
    entity_category TEXT,
    data_service_enabled INTEGER NOT NULL DEFAULT 1,
    data_management_enabled INTEGER NOT NULL DEFAULT 1,
    is_read_only INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (global_version_id, name)
);
CREATE INDEX IF NOT EXISTS idx_data_entities_collection
    ON data_entities(global_version_id, public_collection_name);

CREATE TABLE IF NOT EXISTS public_entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    entity_set_name TEXT NOT NULL DEFAULT '',
    label_id TEXT,
    label_text TEXT,
    is_read_only INTEGER NOT NULL DEFAULT 0,
    configuration_enabled INTEGER NOT NULL DEFAULT 1,
    UNIQUE (global_version_id, name)
);
CREATE INDEX IF NOT EXISTS idx_public_entities_set
    ON public_entities(global_version_id, entity_set_name);

CREATE TABLE IF NOT EXISTS entity_properties (
    entity_id INTEGER NOT NULL REFERENCES public_entities(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    type_name TEXT NOT NULL DEFAULT '',
    data_type TEXT NOT NULL DEFAULT 'String',
    label_id TEXT,
    label_text TEXT,
    is_key INTEGER NOT NULL DEFAULT 0,
    is_mandatory INTEGER NOT NULL DEFAULT 0,
    configuration_enabled INTEGER NOT NULL DEFAULT 1,
    allow_edit INTEGER NOT NULL DEFAULT 1,
    allow_edit_on_create INTEGER NOT NULL DEFAULT 1,
    is_dimension INTEGER NOT NULL DEFAULT 0,
    dimension_relation TEXT,
    property_order INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_entity_properties_entity ON entity_properties(entity_id);

CREATE TABLE IF NOT EXISTS navigation_properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES public_entities(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    related_entity TEXT NOT NULL DEFAULT '',
    cardinality TEXT NOT NULL DEFAULT 'Single'
);
CREATE INDEX IF NOT EXISTS idx_navigation_properties_entity
    ON navigation_properties(entity_id);

CREATE TABLE IF NOT EXISTS relation_constraints (
    navigation_property_id INTEGER NOT NULL REFERENCES navigation_properties(id),
    global_version_id INTEGER NOT NULL,
    constraint_type TEXT NOT NULL,
    property_name TEXT,
    referenced_property TEXT,
    related_property TEXT,
    fixed_value INTEGER,
    fixed_value_str TEXT
);
CREATE INDEX IF NOT EXISTS idx_relation_constraints_nav
    ON relation_constraints(navigation_property_id);

CREATE TABLE IF NOT EXISTS property_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES public_entities(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    group_order INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_property_groups_entity ON property_groups(entity_id);

CREATE TABLE IF NOT EXISTS property_group_members (
    group_id INTEGER NOT NULL REFERENCES property_groups(id),
    property_name TEXT NOT NULL,
    member_order INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_property_group_members_group
    ON property_group_members(group_id);

CREATE TABLE IF NOT EXISTS entity_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id INTEGER NOT NULL REFERENCES public_entities(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    binding_kind TEXT NOT NULL DEFAULT 'Unbound',
    entity_name TEXT,
    return_type_name TEXT,
    return_is_collection INTEGER NOT NULL DEFAULT 0,
    return_odata_xpp_type TEXT,
    field_lookup TEXT
);
CREATE INDEX IF NOT EXISTS idx_entity_actions_entity ON entity_actions(entity_id);

CREATE TABLE IF NOT EXISTS action_parameters (
    action_id INTEGER NOT NULL REFERENCES entity_actions(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    type_name TEXT NOT NULL DEFAULT '',
    is_collection INTEGER NOT NULL DEFAULT 0,
    odata_xpp_type TEXT,
    parameter_order INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_action_parameters_action ON action_parameters(action_id);

CREATE TABLE IF NOT EXISTS enumerations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    label_id TEXT,
    label_text TEXT,
    UNIQUE (global_version_id, name)
);

CREATE TABLE IF NOT EXISTS enumeration_members (
    enumeration_id INTEGER NOT NULL REFERENCES enumerations(id),
    global_version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 0,
    label_id TEXT,
    label_text TEXT,
    configuration_enabled INTEGER NOT NULL DEFAULT 1,
    member_order INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_enumeration_members_enum
    ON enumeration_members(enumeration_id);

CREATE TABLE IF NOT EXISTS labels_cache (
    label_id TEXT NOT NULL,
    language TEXT NOT NULL,
    value TEXT NOT NULL,
    cached_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (label_id, language)
);
CREATE INDEX IF NOT EXISTS idx_labels_cache_expires ON labels_cache(expires_at);
";

/// DDL for the full-text index.
///
/// The `entity_type` and `global_version_id` columns are unindexed filters;
/// the remaining columns feed BM25 ranking.
pub(crate) const FTS_SCHEMA_SQL: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS metadata_search USING fts5(\
name, entity_set_name, labels, properties_text, actions_text, \
entity_type UNINDEXED, global_version_id UNINDEXED)";

/// Initializes pragmas, base tables, and the FTS index on a connection.
pub(crate) async fn init_schema(client: &Client) -> Result<(), async_sqlite::Error> {
    client
        .conn(|conn| {
            // WAL is set by the client builder; the rest trades durability
            // for sync throughput on a regenerable cache.
            conn.execute_batch(
                "PRAGMA synchronous = NORMAL;
                 PRAGMA cache_size = -10240;
                 PRAGMA temp_store = MEMORY;",
            )?;
            conn.execute_batch(SCHEMA_SQL)?;
            conn.execute_batch(FTS_SCHEMA_SQL)?;
            Ok(())
        })
        .await
}

/// Drops and re-creates the FTS table when its declared schema drifted from
/// the expected DDL (e.g. after a library upgrade added columns).
pub(crate) async fn ensure_fts_schema(client: &Client) -> Result<(), async_sqlite::Error> {
    client
        .conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'metadata_search'",
                    [],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let drifted = match existing {
                Some(sql) => normalize_ddl(&sql) != normalize_ddl(FTS_SCHEMA_SQL),
                None => false,
            };

            if drifted {
                conn.execute_batch("DROP TABLE metadata_search")?;
            }
            conn.execute_batch(FTS_SCHEMA_SQL)?;
            Ok(())
        })
        .await
}

fn normalize_ddl(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace("if not exists ", "")
}
