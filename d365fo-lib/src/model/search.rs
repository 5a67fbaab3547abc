//! Metadata search types

use serde::Deserialize;
use serde::Serialize;

/// Metadata entity families covered by the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataType {
    /// Data entity catalog entries.
    DataEntity,
    /// Public entity schemas.
    PublicEntity,
    /// Public enumerations.
    Enumeration,
}

impl MetadataType {
    /// Returns the storage name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataEntity => "data_entity",
            Self::PublicEntity => "public_entity",
            Self::Enumeration => "enumeration",
        }
    }

    /// Parses a type from its storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_entity" => Some(Self::DataEntity),
            "public_entity" => Some(Self::PublicEntity),
            "enumeration" => Some(Self::Enumeration),
            _ => None,
        }
    }
}

/// A full-text search request against the metadata cache.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query text.
    pub text: String,
    /// Restrict to these entity families; `None` searches all.
    pub entity_types: Option<Vec<MetadataType>>,
    /// Maximum results to return.
    pub limit: usize,
    /// Results to skip.
    pub offset: usize,
}

impl SearchQuery {
    /// Creates a query with default paging (50 results, no offset).
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entity_types: None,
            limit: 50,
            offset: 0,
        }
    }

    /// Restricts the query to the given entity families.
    pub fn entity_types(mut self, types: Vec<MetadataType>) -> Self {
        self.entity_types = Some(types);
        self
    }

    /// Sets the result limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the result offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// A single search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Name of the matched object.
    pub name: String,
    /// Which family the object belongs to.
    pub entity_type: MetadataType,
    /// OData entity-set name, when the object has one.
    pub entity_set_name: Option<String>,
    /// Resolved label text, when cached.
    pub label_text: Option<String>,
    /// Highlighted match snippet.
    pub snippet: Option<String>,
    /// Relevance score; higher ranks first.
    pub relevance: f64,
}

/// A page of search hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// The hits, most relevant first.
    pub results: Vec<SearchResult>,
    /// Total hits matching the query, ignoring paging.
    pub total_count: i64,
    /// Time spent executing the query.
    pub query_time_ms: f64,
    /// Whether the result came from a query cache rather than the index.
    pub cache_hit: bool,
}
