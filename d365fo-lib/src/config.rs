//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::error::CacheError;
use crate::error::Error;
use crate::http::RetryConfig;
use crate::http::SessionOptions;

/// Environment variable holding the environment base URL.
pub const ENV_BASE_URL: &str = "D365FO_BASE_URL";
/// Environment variable holding the OAuth2 client ID.
pub const ENV_CLIENT_ID: &str = "D365FO_CLIENT_ID";
/// Environment variable holding the OAuth2 client secret.
pub const ENV_CLIENT_SECRET: &str = "D365FO_CLIENT_SECRET";
/// Environment variable holding the Azure AD tenant ID.
pub const ENV_TENANT_ID: &str = "D365FO_TENANT_ID";

/// Cache directory name under the platform cache root.
const CACHE_APP_DIR: &str = "d365fo-client";

/// Where a client gets its credentials.
///
/// `None` in [`FOClientConfig::credential_source`] means "ambient/default
/// credentials": the caller injects a token provider wrapping its
/// credential chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum CredentialSource {
    /// Explicit client credentials for the client-credentials grant.
    ClientCredentials {
        /// Azure AD tenant ID.
        tenant_id: String,
        /// Application (client) ID.
        client_id: String,
        /// Client secret.
        client_secret: String,
    },
    /// Read client credentials from the `D365FO_*` environment variables at
    /// build time.
    Environment,
}

/// Configuration for one F&O client.
#[derive(Debug, Clone)]
pub struct FOClientConfig {
    /// Environment base URL (e.g. `https://myenv.operations.dynamics.com`).
    pub base_url: String,
    /// Credential source; `None` requires an injected token provider.
    pub credential_source: Option<CredentialSource>,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether label lookups go through the label cache.
    pub use_label_cache: bool,
    /// Label cache TTL in minutes.
    pub label_cache_expiry_minutes: u64,
    /// Whether metadata reads prefer the cache over the remote API.
    pub use_cache_first: bool,
    /// Whether to open the metadata cache at all.
    pub enable_metadata_cache: bool,
    /// Cache directory override; the platform default is used when `None`.
    pub cache_dir: Option<PathBuf>,
    /// Label language.
    pub language: String,
    /// Maximum concurrent in-flight requests.
    pub max_concurrent_requests: usize,
    /// Entity set queried for the module inventory; the server name varies
    /// by release.
    pub module_inventory_entity: String,
    /// Retry policy for transient HTTP failures.
    pub retry: RetryConfig,
}

impl FOClientConfig {
    /// Creates a configuration with defaults for everything but the URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential_source: None,
            verify_ssl: true,
            timeout: Duration::from_secs(30),
            use_label_cache: true,
            label_cache_expiry_minutes: 60,
            use_cache_first: true,
            enable_metadata_cache: true,
            cache_dir: None,
            language: "en-US".to_string(),
            max_concurrent_requests: 10,
            module_inventory_entity: "InstalledModules".to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Builds a configuration from the `D365FO_*` environment variables.
    ///
    /// The base URL is required; client credentials are picked up when all
    /// three credential variables are present.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| Error::Config(format!("{} is not set", ENV_BASE_URL)))?;

        let mut config = Self::new(base_url);
        if let (Ok(client_id), Ok(client_secret), Ok(tenant_id)) = (
            std::env::var(ENV_CLIENT_ID),
            std::env::var(ENV_CLIENT_SECRET),
            std::env::var(ENV_TENANT_ID),
        ) {
            config.credential_source = Some(CredentialSource::ClientCredentials {
                tenant_id,
                client_id,
                client_secret,
            });
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.base_url.is_empty() {
            return Err(Error::Config("base_url must not be empty".to_string()));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid base_url: {}", e)))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(Error::Config(format!(
                "base_url must be http(s), got {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Config("base_url has no host".to_string()));
        }
        if let Some(CredentialSource::ClientCredentials {
            tenant_id,
            client_id,
            client_secret,
        }) = &self.credential_source
        {
            if tenant_id.is_empty() || client_id.is_empty() || client_secret.is_empty() {
                return Err(Error::Config(
                    "client credentials require tenant_id, client_id, and client_secret"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolves the per-environment cache directory:
    /// `<cache root>/d365fo-client/<env-host>`.
    pub fn environment_cache_dir(&self) -> Result<PathBuf, CacheError> {
        let host = Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| CacheError::Unavailable {
                reason: format!("cannot derive host from {}", self.base_url),
            })?;

        let root = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => BaseDirs::new()
                .map(|dirs| dirs.cache_dir().join(CACHE_APP_DIR))
                .ok_or_else(|| CacheError::Unavailable {
                    reason: "cannot determine platform cache directory".to_string(),
                })?,
        };
        Ok(root.join(host))
    }

    /// Returns the HTTP session options implied by this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: self.timeout,
            verify_ssl: self.verify_ssl,
            retry: self.retry.clone(),
            max_concurrent_requests: self.max_concurrent_requests,
        }
    }

    /// Returns the label cache TTL as a duration.
    pub fn label_ttl(&self) -> Duration {
        Duration::from_secs(self.label_cache_expiry_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FOClientConfig::new("https://env.example.com");
        assert!(config.verify_ssl);
        assert!(config.use_label_cache);
        assert_eq!(config.label_cache_expiry_minutes, 60);
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.language, "en-US");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_urls() {
        assert!(FOClientConfig::new("").validate().is_err());
        assert!(FOClientConfig::new("not a url").validate().is_err());
        assert!(FOClientConfig::new("ftp://env.example.com").validate().is_err());
    }

    #[test]
    fn test_validation_rejects_incomplete_credentials() {
        let mut config = FOClientConfig::new("https://env.example.com");
        config.credential_source = Some(CredentialSource::ClientCredentials {
            tenant_id: "t".to_string(),
            client_id: String::new(),
            client_secret: "s".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_dir_uses_host() {
        let mut config = FOClientConfig::new("https://env.example.com");
        config.cache_dir = Some(PathBuf::from("/tmp/cache-root"));
        let dir = config.environment_cache_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/cache-root/env.example.com"));
    }
}
