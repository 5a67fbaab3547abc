//! Authentication error types

/// Errors that can occur during token acquisition or refresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Initial token acquisition failed.
    #[error("Token acquisition failed: {message}")]
    TokenAcquisition {
        /// Description from the token endpoint.
        message: String,
    },

    /// Token expired and the refresh attempt failed.
    #[error("Token expired and refresh failed: {message}")]
    TokenRefresh {
        /// Description from the token endpoint.
        message: String,
    },

    /// The specified tenant ID is invalid or not found.
    #[error("Invalid tenant: {tenant}")]
    InvalidTenant {
        /// The rejected tenant ID.
        tenant: String,
    },

    /// The specified client ID is invalid or not authorized.
    #[error("Invalid client: {client_id}")]
    InvalidClient {
        /// The rejected client ID.
        client_id: String,
    },

    /// Network error while talking to the token endpoint.
    #[error("Network error during auth: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to parse the token endpoint response.
    #[error("Auth response parse error: {0}")]
    Parse(String),
}
