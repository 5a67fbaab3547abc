//! Main D365Client

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::api::labels::LabelOperations;
use crate::api::metadata::DataEntityQuery;
use crate::api::metadata::MetadataApi;
use crate::api::query::QueryOptions;
use crate::api::query::odata::build_query_string;
use crate::auth::CachedTokenProvider;
use crate::auth::ClientCredentialsFlow;
use crate::auth::TokenProvider;
use crate::cache::DataEntityFilter;
use crate::cache::MetadataCache;
use crate::config::CredentialSource;
use crate::config::FOClientConfig;
use crate::error::Error;
use crate::http::HttpSession;
use crate::http::SessionRequest;
use crate::model::DataEntityInfo;
use crate::model::EnumerationInfo;
use crate::model::PublicEntityInfo;
use crate::model::SearchQuery;
use crate::model::SearchResults;
use crate::sync::SyncSessionManager;
use crate::sync::SyncStrategy;

/// The per-profile client for a D365 Finance & Operations environment.
///
/// Wires the session, metadata API, label operations, metadata cache, and
/// sync session manager together. Cheap to clone (uses `Arc` internally).
///
/// # Example
///
/// ```ignore
/// use d365fo_lib::{D365Client, FOClientConfig};
/// use d365fo_lib::config::CredentialSource;
///
/// let mut config = FOClientConfig::new("https://myenv.operations.dynamics.com");
/// config.credential_source = Some(CredentialSource::Environment);
///
/// let client = D365Client::builder().config(config).build().await?;
/// client.test_connection().await?;
/// ```
#[derive(Clone)]
pub struct D365Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: FOClientConfig,
    session: Arc<HttpSession>,
    metadata_api: Arc<MetadataApi>,
    labels: Arc<LabelOperations>,
    cache: Option<Arc<MetadataCache>>,
    sync: Option<SyncSessionManager>,
    schemas: DashMap<String, Option<Arc<PublicEntityInfo>>>,
}

/// Outcome of [`D365Client::initialize_metadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataInitResult {
    /// The global version the environment resolved to, when known.
    pub global_version_id: Option<i64>,
    /// Whether the version was first seen during this call.
    pub is_new_version: bool,
    /// Whether a sync is needed (or was started).
    pub sync_needed: bool,
    /// The background sync session started, when one was.
    pub sync_session_id: Option<Uuid>,
    /// Strategy chosen for the started session.
    pub strategy: Option<SyncStrategy>,
}

impl D365Client {
    /// Creates a new builder for constructing a client.
    pub fn builder() -> D365ClientBuilder<Missing> {
        D365ClientBuilder::new()
    }

    /// Returns the environment base URL.
    pub fn base_url(&self) -> &str {
        &self.inner.config.base_url
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &FOClientConfig {
        &self.inner.config
    }

    pub(crate) fn session(&self) -> &Arc<HttpSession> {
        &self.inner.session
    }

    /// Returns the metadata API client.
    pub fn metadata_api(&self) -> &Arc<MetadataApi> {
        &self.inner.metadata_api
    }

    /// Returns the label operations.
    pub fn labels(&self) -> &Arc<LabelOperations> {
        &self.inner.labels
    }

    /// Returns the metadata cache, when enabled.
    pub fn cache(&self) -> Option<&Arc<MetadataCache>> {
        self.inner.cache.as_ref()
    }

    /// Returns the sync session manager.
    ///
    /// # Errors
    ///
    /// Fails when the metadata cache is disabled.
    pub fn sync_manager(&self) -> Result<&SyncSessionManager, Error> {
        self.inner
            .sync
            .as_ref()
            .ok_or_else(|| Error::Config("metadata cache is disabled".to_string()))
    }

    /// Probes the `/data` endpoint. Returns `false` on any failure.
    pub async fn test_connection(&self) -> bool {
        let url = format!("{}/data", self.base_url().trim_end_matches('/'));
        match self.inner.session.send(SessionRequest::get(url)).await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(error = %err, "connection test failed");
                false
            }
        }
    }

    /// Probes the `/Metadata` endpoint, falling back to a label probe.
    /// Returns `false` on any failure.
    pub async fn test_metadata_connection(&self) -> bool {
        let options = QueryOptions::new().top(1);
        let url = format!(
            "{}/PublicEntities{}",
            self.inner.metadata_api.metadata_url(),
            build_query_string(&options)
        );
        if let Ok(response) = self.inner.session.send(SessionRequest::get(url)).await {
            if response.status().is_success() {
                return true;
            }
        }

        let options = QueryOptions::new()
            .filter("startswith(Id, '@SYS') and Language eq 'en-US'")
            .top(1);
        let url = format!(
            "{}/Labels{}",
            self.inner.metadata_api.metadata_url(),
            build_query_string(&options)
        );
        match self.inner.session.send(SessionRequest::get(url)).await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!(error = %err, "metadata connection test failed");
                false
            }
        }
    }

    /// Detects the environment version and starts a background sync when
    /// the cache has no complete metadata for it.
    ///
    /// When module inventory retrieval fails, falls back to comparing
    /// version strings against the active global version; a mismatch (or no
    /// active version) reports `sync_needed` without starting a session,
    /// since an untracked version cannot be synced.
    pub async fn initialize_metadata(&self) -> Result<MetadataInitResult, Error> {
        let cache = self
            .cache()
            .ok_or_else(|| Error::Config("metadata cache is disabled".to_string()))?
            .clone();
        let sync = self.sync_manager()?.clone();

        let detection = match self.detect_environment_version().await {
            Ok(detection) => detection,
            Err(err) => {
                warn!(error = %err, "version detection failed");
                return Ok(MetadataInitResult {
                    global_version_id: None,
                    is_new_version: false,
                    sync_needed: true,
                    sync_session_id: None,
                    strategy: None,
                });
            }
        };

        let manager = cache.version_manager();

        if detection.modules.is_empty() {
            // Degraded mode: no inventory. Matching version strings against
            // the active global version count as same-version.
            if let Some(link) = manager
                .get_environment_version_info(cache.environment_id())
                .await?
            {
                if let Some(active) = manager.get_global_version_info(link.global_version_id).await?
                {
                    let same_version = active.application_version == detection.application_version
                        && active.platform_version == detection.platform_build_version
                        && active.application_build_version == detection.application_build_version;
                    if same_version && cache.has_complete_metadata(active.id).await? {
                        info!(global_version_id = active.id, "degraded detection matched active version");
                        return Ok(MetadataInitResult {
                            global_version_id: Some(active.id),
                            is_new_version: false,
                            sync_needed: false,
                            sync_session_id: None,
                            strategy: None,
                        });
                    }
                }
            }
            return Ok(MetadataInitResult {
                global_version_id: None,
                is_new_version: false,
                sync_needed: true,
                sync_session_id: None,
                strategy: None,
            });
        }

        let (global_version_id, is_new_version) = manager
            .register_environment_version(
                cache.environment_id(),
                &detection.modules,
                detection.application_version.clone(),
                detection.platform_build_version.clone(),
                detection.application_build_version.clone(),
            )
            .await?;

        if cache.has_complete_metadata(global_version_id).await? {
            info!(global_version_id, "cached metadata is complete, no sync needed");
            return Ok(MetadataInitResult {
                global_version_id: Some(global_version_id),
                is_new_version,
                sync_needed: false,
                sync_session_id: None,
                strategy: None,
            });
        }

        let strategy = sync.recommend_strategy(global_version_id).await?;
        let session_id = sync
            .start_sync_session(global_version_id, strategy, "system")
            .await?;

        Ok(MetadataInitResult {
            global_version_id: Some(global_version_id),
            is_new_version,
            sync_needed: true,
            sync_session_id: Some(session_id),
            strategy: Some(strategy),
        })
    }

    /// Full-text search over cached metadata.
    pub async fn search_metadata(&self, query: &SearchQuery) -> Result<SearchResults, Error> {
        let cache = self
            .cache()
            .ok_or_else(|| Error::Config("metadata cache is disabled".to_string()))?;
        Ok(cache.search(query, None).await?)
    }

    /// Lists data entities, preferring complete cached metadata over the
    /// remote API when `use_cache_first` is set.
    pub async fn get_data_entities(
        &self,
        query: &DataEntityQuery,
    ) -> Result<Vec<DataEntityInfo>, Error> {
        if self.inner.config.use_cache_first {
            if let Some(cache) = self.cache() {
                if let Some(version) = cache.current_global_version_id().await? {
                    if cache.has_complete_metadata(version).await? {
                        let filter = DataEntityFilter {
                            data_service_enabled: query.data_service_enabled,
                            entity_category: query.entity_category,
                            name_pattern: query
                                .name_contains
                                .as_ref()
                                .map(|name| format!("%{}%", name)),
                        };
                        return Ok(cache.get_data_entities(Some(version), &filter).await?);
                    }
                }
            }
        }

        let options = query.to_filter().map(|f| QueryOptions::new().filter(f));
        self.inner
            .metadata_api
            .get_data_entities(options.as_ref())
            .await
    }

    /// Fetches a public entity schema, cache first, optionally resolving
    /// its labels.
    pub async fn get_public_entity_info(
        &self,
        name: &str,
        resolve_labels: bool,
    ) -> Result<Option<PublicEntityInfo>, Error> {
        let mut entity = None;
        if self.inner.config.use_cache_first {
            if let Some(cache) = self.cache() {
                entity = cache.get_public_entity_schema(name, None).await?;
            }
        }
        if entity.is_none() {
            entity = self.inner.metadata_api.get_public_entity_info(name).await?;
        }

        if let Some(entity) = entity.as_mut() {
            if resolve_labels {
                self.inner
                    .labels
                    .resolve_entity_labels(entity, &self.inner.config.language)
                    .await?;
            }
        }
        Ok(entity)
    }

    /// Fetches an enumeration with members, cache first, optionally
    /// resolving its labels.
    pub async fn get_public_enumeration_info(
        &self,
        name: &str,
        resolve_labels: bool,
    ) -> Result<Option<EnumerationInfo>, Error> {
        let mut enumeration = None;
        if self.inner.config.use_cache_first {
            if let Some(cache) = self.cache() {
                enumeration = cache.get_enumeration_info(name, None).await?;
            }
        }
        if enumeration.is_none() {
            enumeration = self
                .inner
                .metadata_api
                .get_public_enumeration_info(name)
                .await?;
        }

        if let Some(enumeration) = enumeration.as_mut() {
            if resolve_labels {
                self.inner
                    .labels
                    .resolve_enumeration_labels(enumeration, &self.inner.config.language)
                    .await?;
            }
        }
        Ok(enumeration)
    }

    /// Resolves one label in the configured (or given) language.
    pub async fn get_label_text(
        &self,
        label_id: &str,
        language: Option<&str>,
    ) -> Result<Option<String>, Error> {
        let language = language.unwrap_or(&self.inner.config.language);
        self.inner.labels.get_label_text(label_id, language).await
    }

    /// Resolves a schema for an entity set, memoizing the result.
    ///
    /// Tries the cache by entity-set name first, then falls back to the
    /// remote API via the data entity catalog. Returns `None` when no
    /// schema can be found; key encoding then degrades to string-typed
    /// insertion order.
    pub(crate) async fn entity_schema(&self, entity_set: &str) -> Option<Arc<PublicEntityInfo>> {
        if let Some(hit) = self.inner.schemas.get(entity_set) {
            return hit.clone();
        }

        let resolved = self.resolve_schema(entity_set).await;
        self.inner
            .schemas
            .insert(entity_set.to_string(), resolved.clone());
        resolved
    }

    async fn resolve_schema(&self, entity_set: &str) -> Option<Arc<PublicEntityInfo>> {
        if let Some(cache) = self.cache() {
            if let Ok(Some(schema)) = cache
                .get_public_entity_schema_by_set_name(entity_set, None)
                .await
            {
                return Some(Arc::new(schema));
            }
        }

        let options = QueryOptions::new().filter(format!(
            "PublicCollectionName eq '{}'",
            entity_set.replace('\'', "''")
        ));
        let entities = self
            .inner
            .metadata_api
            .get_data_entities(Some(&options))
            .await
            .ok()?;
        let entry = entities.first()?;
        let schema = self
            .inner
            .metadata_api
            .get_public_entity_info(&entry.public_entity_name)
            .await
            .ok()??;
        Some(Arc::new(schema))
    }

    /// Releases the session and cache handles.
    pub async fn close(&self) -> Result<(), Error> {
        if let Some(cache) = self.cache() {
            cache.close().await?;
        }
        Ok(())
    }
}

// =============================================================================
// Typestate Builder
// =============================================================================

/// Marker type for missing required builder fields.
pub struct Missing;

/// Marker type for set builder fields.
pub struct Set<T>(T);

/// Builder for constructing a [`D365Client`].
///
/// The configuration is required at compile time; a token provider is
/// derived from the configured credential source unless one is injected
/// (ambient/default credential chains must be injected).
pub struct D365ClientBuilder<Config> {
    config: Config,
    token_provider: Option<Arc<dyn TokenProvider>>,
    metadata_cache: Option<Arc<MetadataCache>>,
}

impl D365ClientBuilder<Missing> {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config: Missing,
            token_provider: None,
            metadata_cache: None,
        }
    }

    /// Sets the client configuration.
    pub fn config(self, config: FOClientConfig) -> D365ClientBuilder<Set<FOClientConfig>> {
        D365ClientBuilder {
            config: Set(config),
            token_provider: self.token_provider,
            metadata_cache: self.metadata_cache,
        }
    }
}

impl Default for D365ClientBuilder<Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> D365ClientBuilder<C> {
    /// Injects a token provider, overriding the configured credential
    /// source. Required when `credential_source` is `None` (ambient
    /// credential chains live outside this crate).
    pub fn token_provider<T: TokenProvider + 'static>(mut self, provider: T) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Injects an already-open metadata cache instead of opening one under
    /// the platform cache directory. Useful for tests and embedded hosts.
    pub fn metadata_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.metadata_cache = Some(cache);
        self
    }
}

impl D365ClientBuilder<Set<FOClientConfig>> {
    /// Builds the client, opening the metadata cache when enabled.
    pub async fn build(self) -> Result<D365Client, Error> {
        let config = self.config.0;
        config.validate()?;

        let token_provider: Arc<dyn TokenProvider> = match self.token_provider {
            Some(provider) => provider,
            None => build_token_provider(&config)?,
        };

        let session = Arc::new(HttpSession::new(
            config.base_url.clone(),
            token_provider,
            config.session_options(),
        )?);
        let metadata_api = Arc::new(MetadataApi::new(session.clone()));

        let cache = match self.metadata_cache {
            Some(cache) => Some(cache),
            None if config.enable_metadata_cache => {
                let dir = config.environment_cache_dir()?;
                Some(Arc::new(MetadataCache::open(dir, &config.base_url).await?))
            }
            None => None,
        };

        let label_cache = if config.use_label_cache {
            cache.clone()
        } else {
            None
        };
        let labels = Arc::new(LabelOperations::new(
            metadata_api.clone(),
            label_cache,
            config.label_ttl(),
        ));

        let sync = cache.clone().map(|cache| {
            SyncSessionManager::new(
                cache,
                metadata_api.clone(),
                labels.clone(),
                config.language.clone(),
            )
        });

        Ok(D365Client {
            inner: Arc::new(ClientInner {
                config,
                session,
                metadata_api,
                labels,
                cache,
                sync,
                schemas: DashMap::new(),
            }),
        })
    }
}

fn build_token_provider(config: &FOClientConfig) -> Result<Arc<dyn TokenProvider>, Error> {
    match &config.credential_source {
        Some(CredentialSource::ClientCredentials {
            tenant_id,
            client_id,
            client_secret,
        }) => {
            let flow = ClientCredentialsFlow::new(tenant_id, client_id, client_secret);
            Ok(Arc::new(CachedTokenProvider::new(flow)))
        }
        Some(CredentialSource::Environment) => {
            let tenant_id = std::env::var(crate::config::ENV_TENANT_ID)
                .map_err(|_| Error::Config(format!("{} is not set", crate::config::ENV_TENANT_ID)))?;
            let client_id = std::env::var(crate::config::ENV_CLIENT_ID)
                .map_err(|_| Error::Config(format!("{} is not set", crate::config::ENV_CLIENT_ID)))?;
            let client_secret = std::env::var(crate::config::ENV_CLIENT_SECRET).map_err(|_| {
                Error::Config(format!("{} is not set", crate::config::ENV_CLIENT_SECRET))
            })?;
            let flow = ClientCredentialsFlow::new(tenant_id, client_id, client_secret);
            Ok(Arc::new(CachedTokenProvider::new(flow)))
        }
        None => Err(Error::Config(
            "ambient credentials require an injected token provider".to_string(),
        )),
    }
}
