//! TokenProvider trait and AccessToken

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::error::AuthError;

/// An OAuth2 access token with optional expiration.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The bearer token used for API authentication.
    pub access_token: String,
    /// When the token expires, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Creates a new access token with just the token string.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Creates a new access token with expiration time.
    pub fn with_expiry(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Returns `true` if the token has expired.
    ///
    /// Returns `false` if expiration time is unknown.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }

    /// Returns `true` if the token will expire within the given duration.
    ///
    /// Returns `false` if expiration time is unknown.
    pub fn expires_within(&self, duration: chrono::Duration) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + duration >= exp)
    }

    /// Returns the token as a bearer authorization header value.
    pub fn as_bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Trait for providing access tokens to the F&O client.
///
/// Implementors are responsible for obtaining tokens, caching them, and
/// refreshing when they expire. The session calls `get_token` before each
/// request and `invalidate` after a 401 so the retried request acquires a
/// fresh token.
///
/// Default credential chains (environment, managed identity, developer
/// tooling) are supplied by implementing this trait and injecting the
/// provider into the client builder.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Gets an access token for the specified resource.
    ///
    /// The `resource` parameter is the F&O environment URL
    /// (e.g. `https://myenv.operations.dynamics.com`).
    async fn get_token(&self, resource: &str) -> Result<AccessToken, AuthError>;

    /// Discards any cached token so the next `get_token` re-authenticates.
    async fn invalidate(&self) {}
}

/// A token provider that always returns the same static token.
///
/// Useful for testing or for long-lived tokens that need no refresh logic.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    /// Creates a new static token provider with the given access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(access_token),
        }
    }

    /// Creates a new static token provider from an existing AccessToken.
    pub fn from_token(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _resource: &str) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_checks() {
        let token = AccessToken::new("t");
        assert!(!token.is_expired());
        assert!(!token.expires_within(chrono::Duration::hours(1)));

        let expired = AccessToken::with_expiry("t", Utc::now() - chrono::Duration::minutes(1));
        assert!(expired.is_expired());

        let soon = AccessToken::with_expiry("t", Utc::now() + chrono::Duration::minutes(2));
        assert!(!soon.is_expired());
        assert!(soon.expires_within(chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_bearer_header() {
        assert_eq!(AccessToken::new("abc").as_bearer(), "Bearer abc");
    }
}
