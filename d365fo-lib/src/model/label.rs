//! Label types

use serde::Deserialize;
use serde::Serialize;

/// A resolved label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    /// Label token (e.g. `@SYS13342`).
    pub id: String,
    /// Language code (e.g. `en-US`).
    pub language: String,
    /// Resolved text; may be empty.
    pub value: String,
}

impl LabelInfo {
    /// Creates a new label.
    pub fn new(
        id: impl Into<String>,
        language: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            language: language.into(),
            value: value.into(),
        }
    }
}
