//! Metadata cache error types

/// Errors raised by the metadata cache backing store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache backing store is not reachable (directory creation or open failed).
    #[error("Cache unavailable: {reason}")]
    Unavailable {
        /// Why the store could not be opened.
        reason: String,
    },

    /// SQLite-level failure.
    #[error("Cache store error: {0}")]
    Sqlite(#[from] async_sqlite::Error),
}
