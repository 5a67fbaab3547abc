//! Error types

mod api;
mod auth;
mod cache;
mod sync;

pub use api::*;
pub use auth::*;
pub use cache::*;
pub use sync::*;

/// Top-level error type for all client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication or token acquisition failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// API call failure (data or metadata endpoints).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Metadata cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Sync session failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid client or profile configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
