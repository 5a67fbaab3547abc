//! Named connection profiles.
//!
//! A profile is the on-disk form of a client configuration. Legacy field
//! names (`label_cache`, `label_expiry`, and loose
//! `client_id`/`client_secret`/`tenant_id` triplets) are accepted on load
//! and normalized to the current field set; serialization writes only
//! current names.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::CredentialSource;
use crate::config::FOClientConfig;
use crate::error::Error;

/// A named connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProfileDe")]
pub struct Profile {
    /// Profile name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Environment base URL.
    pub base_url: String,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Credential source; `None` means ambient/default credentials.
    pub credential_source: Option<CredentialSource>,
    /// Whether label lookups go through the label cache.
    pub use_label_cache: bool,
    /// Label cache TTL in minutes.
    pub label_cache_expiry_minutes: u64,
    /// Whether metadata reads prefer the cache over the remote API.
    pub use_cache_first: bool,
    /// Cache directory override.
    pub cache_dir: Option<PathBuf>,
    /// Label language.
    pub language: String,
}

impl Profile {
    /// Creates a profile with defaults for everything but name and URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            base_url: base_url.into(),
            verify_ssl: true,
            timeout_seconds: 30,
            credential_source: None,
            use_label_cache: true,
            label_cache_expiry_minutes: 60,
            use_cache_first: true,
            cache_dir: None,
            language: "en-US".to_string(),
        }
    }

    /// Validates the profile's unified parameter set.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::Config("profile name must not be empty".to_string()));
        }
        self.to_config().validate()
    }

    /// Converts the profile into a client configuration.
    pub fn to_config(&self) -> FOClientConfig {
        let mut config = FOClientConfig::new(self.base_url.clone());
        config.credential_source = self.credential_source.clone();
        config.verify_ssl = self.verify_ssl;
        config.timeout = Duration::from_secs(self.timeout_seconds);
        config.use_label_cache = self.use_label_cache;
        config.label_cache_expiry_minutes = self.label_cache_expiry_minutes;
        config.use_cache_first = self.use_cache_first;
        config.cache_dir = self.cache_dir.clone();
        config.language = self.language.clone();
        config
    }
}

/// Wire shape accepted on load, including legacy field names.
#[derive(Deserialize)]
struct ProfileDe {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    base_url: String,
    #[serde(default = "default_true")]
    verify_ssl: bool,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
    #[serde(default)]
    credential_source: Option<CredentialSource>,
    #[serde(default = "default_true", alias = "label_cache")]
    use_label_cache: bool,
    #[serde(default = "default_label_expiry", alias = "label_expiry")]
    label_cache_expiry_minutes: u64,
    #[serde(default = "default_true")]
    use_cache_first: bool,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default = "default_language")]
    language: String,
    // Legacy explicit credentials, folded into credential_source.
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
}

impl From<ProfileDe> for Profile {
    fn from(de: ProfileDe) -> Self {
        let credential_source = de.credential_source.or_else(|| {
            match (de.client_id, de.client_secret, de.tenant_id) {
                (Some(client_id), Some(client_secret), Some(tenant_id)) => {
                    Some(CredentialSource::ClientCredentials {
                        tenant_id,
                        client_id,
                        client_secret,
                    })
                }
                _ => None,
            }
        });

        Self {
            name: de.name,
            description: de.description,
            base_url: de.base_url,
            verify_ssl: de.verify_ssl,
            timeout_seconds: de.timeout_seconds,
            credential_source,
            use_label_cache: de.use_label_cache,
            label_cache_expiry_minutes: de.label_cache_expiry_minutes,
            use_cache_first: de.use_cache_first,
            cache_dir: de.cache_dir,
            language: de.language,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_label_expiry() -> u64 {
    60
}

fn default_language() -> String {
    "en-US".to_string()
}

/// Contract for the external profile store.
///
/// Persistence (file format, default-profile pointer, descriptions) is
/// owned by the collaborator implementing this trait.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Loads a profile by name.
    async fn load(&self, name: &str) -> Result<Option<Profile>, Error>;

    /// Saves a profile, overwriting any existing one with the same name.
    async fn save(&self, profile: &Profile) -> Result<(), Error>;

    /// Lists all stored profiles.
    async fn list(&self) -> Result<Vec<Profile>, Error>;

    /// Returns the default profile's name, if one is set.
    async fn default_profile(&self) -> Result<Option<String>, Error>;

    /// Sets the default profile.
    async fn set_default_profile(&self, name: &str) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_field_names_migrate() {
        let profile: Profile = serde_json::from_str(
            r#"{
                "name": "legacy",
                "base_url": "https://env.example.com",
                "label_cache": false,
                "label_expiry": 120
            }"#,
        )
        .unwrap();
        assert!(!profile.use_label_cache);
        assert_eq!(profile.label_cache_expiry_minutes, 120);
    }

    #[test]
    fn test_legacy_credentials_fold_into_source() {
        let profile: Profile = serde_json::from_str(
            r#"{
                "name": "legacy",
                "base_url": "https://env.example.com",
                "client_id": "cid",
                "client_secret": "secret",
                "tenant_id": "tid"
            }"#,
        )
        .unwrap();
        assert_eq!(
            profile.credential_source,
            Some(CredentialSource::ClientCredentials {
                tenant_id: "tid".to_string(),
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_serialization_writes_current_names_only() {
        let profile = Profile::new("p", "https://env.example.com");
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("use_label_cache"));
        assert!(!json.contains("\"label_cache\""));
        assert!(!json.contains("client_id"));
    }

    #[test]
    fn test_current_names_win_over_aliases() {
        let profile: Profile = serde_json::from_str(
            r#"{
                "name": "p",
                "base_url": "https://env.example.com",
                "use_label_cache": true,
                "label_cache_expiry_minutes": 45
            }"#,
        )
        .unwrap();
        assert!(profile.use_label_cache);
        assert_eq!(profile.label_cache_expiry_minutes, 45);
    }

    #[test]
    fn test_validation() {
        assert!(Profile::new("p", "https://env.example.com").validate().is_ok());
        assert!(Profile::new("", "https://env.example.com").validate().is_err());
        assert!(Profile::new("p", "nonsense").validate().is_err());
    }

    #[test]
    fn test_to_config_carries_fields() {
        let mut profile = Profile::new("p", "https://env.example.com");
        profile.timeout_seconds = 90;
        profile.language = "de-DE".to_string();
        let config = profile.to_config();
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.language, "de-DE");
    }
}
