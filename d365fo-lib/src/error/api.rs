//! API error types

/// Errors that can occur while calling the data or metadata endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network error after the retry budget was exhausted.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response from the Metadata API.
    #[error("Metadata fetch failed: HTTP {status}: {body}")]
    MetadataFetchFailed {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// Non-2xx response from a data entity endpoint.
    #[error("{operation} on {entity_set} failed: HTTP {status}: {body}")]
    Entity {
        /// The operation that failed (GET, POST, PATCH, PUT, DELETE).
        operation: String,
        /// The entity set targeted.
        entity_set: String,
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// Non-2xx response from an action invocation.
    #[error("Action {action} failed: HTTP {status}: {body}")]
    Action {
        /// The action name.
        action: String,
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// Non-2xx (and non-404) response from a label fetch.
    #[error("Label fetch failed: HTTP {status}: {body}")]
    Label {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },

    /// 404 where a single record was expected.
    #[error("Not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// 409 on create.
    #[error("Conflict creating record in {entity_set}")]
    Conflict {
        /// The entity set targeted.
        entity_set: String,
    },

    /// Write attempt blocked because the cached schema marks the entity read-only.
    #[error("Entity {entity_set} is read-only")]
    ReadOnlyEntity {
        /// The entity set targeted.
        entity_set: String,
    },

    /// Composite key field/value cardinality error.
    #[error("Composite key for {entity_set} expects {expected} fields, got {actual}")]
    KeyMismatch {
        /// The entity set targeted.
        entity_set: String,
        /// Number of key fields the schema declares.
        expected: usize,
        /// Number of fields the caller supplied.
        actual: usize,
    },

    /// 400 with a structured error body.
    #[error("Validation failed: {body}")]
    ValidationFailed {
        /// Structured error body from the server.
        body: String,
    },

    /// A key value could not be serialized for use in a URL.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl ApiError {
    /// Returns the HTTP status code if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::MetadataFetchFailed { status, .. }
            | Self::Entity { status, .. }
            | Self::Action { status, .. }
            | Self::Label { status, .. } => Some(*status),
            _ => None,
        }
    }
}
