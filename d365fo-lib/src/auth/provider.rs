//! Token caching with coalesced refresh.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use super::AccessToken;
use super::ClientCredentialsFlow;
use super::TokenProvider;
use crate::error::AuthError;

/// Refresh tokens this long before their reported expiry, to absorb clock
/// skew between the client and the token service.
const DEFAULT_SKEW_BUFFER_SECS: i64 = 300;

/// A token provider that caches one token per client and refreshes it
/// ahead of expiry.
///
/// Concurrent callers that observe an expired token coalesce on a single
/// refresh: the refresh critical section is guarded by a mutex, and waiters
/// re-check the cache once they acquire it.
pub struct CachedTokenProvider {
    flow: ClientCredentialsFlow,
    token: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
    skew: chrono::Duration,
}

impl CachedTokenProvider {
    /// Creates a provider with the default 5-minute skew buffer.
    pub fn new(flow: ClientCredentialsFlow) -> Self {
        Self {
            flow,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            skew: chrono::Duration::seconds(DEFAULT_SKEW_BUFFER_SECS),
        }
    }

    /// Creates a provider with a custom skew buffer.
    pub fn with_skew_buffer(flow: ClientCredentialsFlow, skew: chrono::Duration) -> Self {
        Self {
            flow,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            skew,
        }
    }

    fn is_usable(&self, token: &AccessToken) -> bool {
        !token.expires_within(self.skew)
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    async fn get_token(&self, resource: &str) -> Result<AccessToken, AuthError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if self.is_usable(token) {
                    return Ok(token.clone());
                }
            }
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited.
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if self.is_usable(token) {
                    return Ok(token.clone());
                }
            }
        }

        let token = self.flow.authenticate(resource).await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.token.write().await = None;
    }
}
