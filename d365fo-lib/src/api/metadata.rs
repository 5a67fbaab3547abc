//! Typed client for the `/Metadata` sub-API.
//!
//! Returns the shapes from [`crate::model`] rather than raw JSON. The
//! `get_all_*` variants drain server-side paging with a `$skip`/`$top`
//! loop, which the sync path uses to avoid the short default page.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::api::query::QueryOptions;
use crate::api::query::odata::build_query_string;
use crate::error::ApiError;
use crate::error::Error;
use crate::http::HttpSession;
use crate::http::SessionRequest;
use crate::model::DataEntityInfo;
use crate::model::EntityCategory;
use crate::model::EnumerationInfo;
use crate::model::PublicEntityInfo;

/// Page size used when draining paged endpoints.
const DRAIN_PAGE_SIZE: u64 = 1000;

/// How much response body to keep in error excerpts.
const BODY_EXCERPT_LEN: usize = 512;

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// Server-side filter pushdown for data entity queries.
#[derive(Debug, Clone, Default)]
pub struct DataEntityQuery {
    /// Case-insensitive name substring.
    pub name_contains: Option<String>,
    /// Restrict by category.
    pub entity_category: Option<EntityCategory>,
    /// Restrict by `DataServiceEnabled`.
    pub data_service_enabled: Option<bool>,
    /// Restrict by `DataManagementEnabled`.
    pub data_management_enabled: Option<bool>,
    /// Restrict by `IsReadOnly`.
    pub is_read_only: Option<bool>,
}

impl DataEntityQuery {
    /// Renders the query as an OData `$filter` expression, or `None` when no
    /// predicate is set.
    pub fn to_filter(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(name) = &self.name_contains {
            parts.push(format!(
                "contains(tolower(Name), '{}')",
                name.to_lowercase().replace('\'', "''")
            ));
        }
        if let Some(category) = self.entity_category {
            parts.push(format!("EntityCategory eq '{}'", category.as_str()));
        }
        if let Some(enabled) = self.data_service_enabled {
            parts.push(format!("DataServiceEnabled eq {}", enabled));
        }
        if let Some(enabled) = self.data_management_enabled {
            parts.push(format!("DataManagementEnabled eq {}", enabled));
        }
        if let Some(read_only) = self.is_read_only {
            parts.push(format!("IsReadOnly eq {}", read_only));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" and "))
        }
    }
}

/// Client for the `/Metadata` endpoints of a D365 F&O environment.
pub struct MetadataApi {
    session: Arc<HttpSession>,
    metadata_url: String,
}

impl MetadataApi {
    /// Creates a metadata client over an existing session.
    pub fn new(session: Arc<HttpSession>) -> Self {
        let metadata_url = format!("{}/Metadata", session.base_url().trim_end_matches('/'));
        Self {
            session,
            metadata_url,
        }
    }

    /// Returns the `/Metadata` base URL.
    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    /// Fetches data entity catalog entries.
    pub async fn get_data_entities(
        &self,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<DataEntityInfo>, Error> {
        self.fetch_list("DataEntities", options).await
    }

    /// Fetches the full data entity catalog, draining server-side paging.
    pub async fn get_all_data_entities(&self) -> Result<Vec<DataEntityInfo>, Error> {
        self.drain("DataEntities").await
    }

    /// Fetches public entity schemas.
    pub async fn get_public_entities(
        &self,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<PublicEntityInfo>, Error> {
        self.fetch_list("PublicEntities", options).await
    }

    /// Fetches one public entity's full schema (properties, navigation
    /// properties with constraints, property groups, actions). Returns
    /// `None` on 404.
    pub async fn get_public_entity_info(
        &self,
        name: &str,
    ) -> Result<Option<PublicEntityInfo>, Error> {
        let url = format!(
            "{}/PublicEntities('{}')",
            self.metadata_url,
            name.replace('\'', "''")
        );
        self.fetch_optional(&url).await
    }

    /// Fetches every public entity with full details in one paged pass.
    /// Used during full sync.
    pub async fn get_all_public_entities_with_details(
        &self,
    ) -> Result<Vec<PublicEntityInfo>, Error> {
        self.drain("PublicEntities").await
    }

    /// Fetches public enumerations.
    pub async fn get_public_enumerations(
        &self,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<EnumerationInfo>, Error> {
        self.fetch_list("PublicEnumerations", options).await
    }

    /// Fetches one enumeration with its members. Returns `None` on 404.
    pub async fn get_public_enumeration_info(
        &self,
        name: &str,
    ) -> Result<Option<EnumerationInfo>, Error> {
        let url = format!(
            "{}/PublicEnumerations('{}')",
            self.metadata_url,
            name.replace('\'', "''")
        );
        self.fetch_optional(&url).await
    }

    /// Fetches every enumeration with members, draining paging.
    pub async fn get_all_public_enumerations_with_details(
        &self,
    ) -> Result<Vec<EnumerationInfo>, Error> {
        self.drain("PublicEnumerations").await
    }

    /// Fetches a single label's text. Returns `None` on 404; the caller must
    /// not cache the absence.
    pub async fn get_label(
        &self,
        label_id: &str,
        language: &str,
    ) -> Result<Option<String>, Error> {
        let url = format!(
            "{}/Labels(Id='{}',Language='{}')",
            self.metadata_url,
            urlencoding::encode(label_id),
            urlencoding::encode(language)
        );

        let response = self.session.send(SessionRequest::get(url)).await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::Label {
                status: status.as_u16(),
                body: excerpt(&body),
            }));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))?;
        Ok(Some(
            value
                .get("Value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ))
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: Option<&QueryOptions>,
    ) -> Result<Vec<T>, Error> {
        let query = options.map(build_query_string).unwrap_or_default();
        let url = format!("{}/{}{}", self.metadata_url, endpoint, query);
        let list: ODataList<T> = self.fetch(&url).await?;
        Ok(list.value)
    }

    async fn drain<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, Error> {
        let mut all = Vec::new();
        let mut skip = 0u64;

        loop {
            let options = QueryOptions::new().top(DRAIN_PAGE_SIZE).skip(skip);
            let page: Vec<T> = self.fetch_list(endpoint, Some(&options)).await?;
            let page_len = page.len() as u64;
            all.extend(page);

            if page_len < DRAIN_PAGE_SIZE {
                return Ok(all);
            }
            skip += page_len;
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let response = self.session.send(SessionRequest::get(url)).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::MetadataFetchFailed {
                status: status.as_u16(),
                body: excerpt(&body),
            }));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Api(ApiError::Network(e)))
    }

    async fn fetch_optional<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, Error> {
        let response = self.session.send(SessionRequest::get(url)).await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(ApiError::MetadataFetchFailed {
                status: status.as_u16(),
                body: excerpt(&body),
            }));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| Error::Api(ApiError::Network(e)))
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LEN {
        body.to_string()
    } else {
        let mut cut = BODY_EXCERPT_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &body[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_pushdown() {
        let query = DataEntityQuery {
            name_contains: Some("Customer".to_string()),
            entity_category: Some(EntityCategory::Master),
            data_service_enabled: Some(true),
            ..Default::default()
        };
        assert_eq!(
            query.to_filter().unwrap(),
            "contains(tolower(Name), 'customer') and EntityCategory eq 'Master' and DataServiceEnabled eq true"
        );
    }

    #[test]
    fn test_empty_filter_is_none() {
        assert!(DataEntityQuery::default().to_filter().is_none());
    }
}
