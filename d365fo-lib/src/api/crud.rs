//! Create, Read, Update, Delete operations and action calls.
//!
//! Every operation consults the cached entity schema (when available) so
//! composite keys serialize with the right OData literal forms, and write
//! attempts against read-only entities are rejected before any HTTP call.

use reqwest::Method;
use serde_json::Value;

use super::query::QueryOptions;
use super::query::odata::build_action_url;
use super::query::odata::build_entity_url;
use super::query::odata::build_query_string;
use super::query::odata::merge_query_strings;
use crate::D365Client;
use crate::error::ApiError;
use crate::error::Error;
use crate::http::SessionRequest;
use crate::model::EntityCollection;
use crate::model::EntityKey;

/// How an update replaces the record: `Patch` merges, `Put` replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    /// Merge the supplied fields into the record.
    Patch,
    /// Replace the whole record.
    Put,
}

impl D365Client {
    /// Queries a collection with OData options.
    ///
    /// When the response carries `@odata.nextLink`, the caller may re-issue
    /// it verbatim for the next page.
    pub async fn get_entities(
        &self,
        entity_set: &str,
        options: Option<&QueryOptions>,
    ) -> Result<EntityCollection, Error> {
        let query = options.map(build_query_string).unwrap_or_default();
        let url = format!(
            "{}/data/{}{}",
            self.base_url().trim_end_matches('/'),
            entity_set,
            query
        );

        let response = self.session().send(SessionRequest::get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(entity_error("GET", entity_set, status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))
    }

    /// Reads a single record by key.
    ///
    /// Composite keys serialize using the cached schema when one exists;
    /// `cross-company=true` is added automatically when `dataAreaId` is part
    /// of the key.
    pub async fn get_entity_by_key(
        &self,
        entity_set: &str,
        key: &EntityKey,
        options: Option<&QueryOptions>,
    ) -> Result<Value, Error> {
        let schema = self.entity_schema(entity_set).await;
        self.check_key_cardinality(entity_set, key, schema.as_deref())?;

        let url = build_entity_url(
            self.base_url(),
            entity_set,
            Some(key),
            schema.as_deref(),
            false,
        )
        .map_err(Error::Api)?;
        let url = self.append_options(url, options);

        let response = self.session().send(SessionRequest::get(url)).await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(Error::Api(ApiError::NotFound {
                resource: format!("{} record", entity_set),
            }));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(entity_error("GET", entity_set, status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))
    }

    /// Creates a record.
    ///
    /// Rejected with `ReadOnlyEntity` before any HTTP call when the cached
    /// schema marks the entity read-only.
    pub async fn create_entity(&self, entity_set: &str, data: Value) -> Result<Value, Error> {
        self.check_writable(entity_set).await?;

        let url = format!(
            "{}/data/{}",
            self.base_url().trim_end_matches('/'),
            entity_set
        );
        let response = self
            .session()
            .send(SessionRequest::post(url).json(data).prefer_representation())
            .await?;
        let status = response.status();

        match status.as_u16() {
            200 | 201 => response
                .json()
                .await
                .map_err(|e| Error::Api(ApiError::Network(e))),
            204 => Ok(Value::Null),
            409 => Err(Error::Api(ApiError::Conflict {
                entity_set: entity_set.to_string(),
            })),
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Api(ApiError::ValidationFailed { body }))
            }
            status_code => {
                let body = response.text().await.unwrap_or_default();
                Err(entity_error("POST", entity_set, status_code, body))
            }
        }
    }

    /// Updates a record. `Patch` merges; `Put` replaces. The `If-Match`
    /// header is sent when `if_match` is given.
    pub async fn update_entity(
        &self,
        entity_set: &str,
        key: &EntityKey,
        data: Value,
        method: UpdateMethod,
        if_match: Option<String>,
    ) -> Result<Value, Error> {
        self.check_writable(entity_set).await?;

        let schema = self.entity_schema(entity_set).await;
        self.check_key_cardinality(entity_set, key, schema.as_deref())?;

        let url = build_entity_url(
            self.base_url(),
            entity_set,
            Some(key),
            schema.as_deref(),
            false,
        )
        .map_err(Error::Api)?;

        let http_method = match method {
            UpdateMethod::Patch => Method::PATCH,
            UpdateMethod::Put => Method::PUT,
        };
        let operation = http_method.to_string();

        let response = self
            .session()
            .send(
                SessionRequest::new(http_method, url)
                    .json(data)
                    .if_match(if_match)
                    .prefer_representation(),
            )
            .await?;
        let status = response.status();

        match status.as_u16() {
            200 => response
                .json()
                .await
                .map_err(|e| Error::Api(ApiError::Network(e))),
            204 => Ok(Value::Null),
            404 => Err(Error::Api(ApiError::NotFound {
                resource: format!("{} record", entity_set),
            })),
            400 => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Api(ApiError::ValidationFailed { body }))
            }
            status_code => {
                let body = response.text().await.unwrap_or_default();
                Err(entity_error(&operation, entity_set, status_code, body))
            }
        }
    }

    /// Deletes a record. 204 means deleted; 404 surfaces as `NotFound`.
    pub async fn delete_entity(&self, entity_set: &str, key: &EntityKey) -> Result<(), Error> {
        self.check_writable(entity_set).await?;

        let schema = self.entity_schema(entity_set).await;
        self.check_key_cardinality(entity_set, key, schema.as_deref())?;

        let url = build_entity_url(
            self.base_url(),
            entity_set,
            Some(key),
            schema.as_deref(),
            false,
        )
        .map_err(Error::Api)?;

        let response = self
            .session()
            .send(SessionRequest::new(Method::DELETE, url))
            .await?;
        let status = response.status();

        match status.as_u16() {
            200 | 204 => Ok(()),
            404 => Err(Error::Api(ApiError::NotFound {
                resource: format!("{} record", entity_set),
            })),
            status_code => {
                let body = response.text().await.unwrap_or_default();
                Err(entity_error("DELETE", entity_set, status_code, body))
            }
        }
    }

    /// Calls an OData action.
    ///
    /// The action name is qualified automatically. `entity_set` binds the
    /// action to a set; adding `entity_key` binds it to an instance. The
    /// raw JSON result is returned (`Null` for void actions).
    pub async fn call_action(
        &self,
        action_name: &str,
        parameters: Option<Value>,
        entity_set: Option<&str>,
        entity_key: Option<&EntityKey>,
    ) -> Result<Value, Error> {
        let schema = match entity_set {
            Some(entity_set) if entity_key.is_some() => self.entity_schema(entity_set).await,
            _ => None,
        };

        let url = build_action_url(
            self.base_url(),
            action_name,
            entity_set,
            entity_key,
            schema.as_deref(),
            false,
        )
        .map_err(Error::Api)?;

        let body = parameters.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let response = self
            .session()
            .send(SessionRequest::post(url).json(body))
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::Action {
                action: action_name.to_string(),
                status: status.as_u16(),
                body,
            }));
        }

        if status.as_u16() == 204 {
            return Ok(Value::Null);
        }
        let text = response
            .text()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(Error::Serialization)
    }

    /// Downloads the raw OData `$metadata` document as XML.
    pub async fn download_metadata_document(&self) -> Result<String, Error> {
        let url = format!(
            "{}/data/$metadata",
            self.base_url().trim_end_matches('/')
        );
        let response = self
            .session()
            .send(SessionRequest::get(url).accept_xml())
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::MetadataFetchFailed {
                status: status.as_u16(),
                body,
            }));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))
    }

    fn append_options(&self, url: String, options: Option<&QueryOptions>) -> String {
        let Some(options) = options else {
            return url;
        };
        let extra = build_query_string(options);
        if extra.is_empty() {
            return url;
        }

        match url.split_once('?') {
            Some((path, existing)) => {
                format!("{}{}", path, merge_query_strings(existing, &extra))
            }
            None => format!("{}{}", url, extra),
        }
    }

    async fn check_writable(&self, entity_set: &str) -> Result<(), Error> {
        if let Some(schema) = self.entity_schema(entity_set).await {
            if schema.is_read_only {
                return Err(Error::Api(ApiError::ReadOnlyEntity {
                    entity_set: entity_set.to_string(),
                }));
            }
        }
        Ok(())
    }

    fn check_key_cardinality(
        &self,
        entity_set: &str,
        key: &EntityKey,
        schema: Option<&crate::model::PublicEntityInfo>,
    ) -> Result<(), Error> {
        let Some(schema) = schema else {
            return Ok(());
        };
        let expected = schema.key_properties().len();
        if expected == 0 {
            return Ok(());
        }

        if let EntityKey::Composite(fields) = key {
            if fields.len() != expected {
                return Err(Error::Api(ApiError::KeyMismatch {
                    entity_set: entity_set.to_string(),
                    expected,
                    actual: fields.len(),
                }));
            }
        }
        Ok(())
    }
}

fn entity_error(operation: &str, entity_set: &str, status: u16, body: String) -> Error {
    Error::Api(ApiError::Entity {
        operation: operation.to_string(),
        entity_set: entity_set.to_string(),
        status,
        body,
    })
}
