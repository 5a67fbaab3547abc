//! OAuth2 client-credentials flow against Azure AD.

use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;

use super::AccessToken;
use crate::error::AuthError;

/// Build v2 token endpoint URL.
pub(crate) fn token_url_v2(tenant_id: &str) -> String {
    format!(
        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
        tenant_id
    )
}

/// Build scope string from resource URL.
pub(crate) fn scope_from_resource(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    expires_in: Option<u64>,
}

/// Deserializes `expires_in` which can be either a number or a string.
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) => s
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom("expires_in is not a number")),
    }
}

/// Error response from Azure AD.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Explicit client-credentials authentication.
///
/// Exchanges `(tenant_id, client_id, client_secret)` for an access token
/// using the OAuth2 client-credentials grant with
/// `scope=<base_url>/.default`.
#[derive(Clone)]
pub struct ClientCredentialsFlow {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl ClientCredentialsFlow {
    /// Creates a new client-credentials flow.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Acquires a token for the given resource.
    pub async fn authenticate(&self, resource: &str) -> Result<AccessToken, AuthError> {
        let url = token_url_v2(&self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", &scope_from_resource(resource)),
        ];

        let response = self.http.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_else(|_| {
                TokenErrorResponse {
                    error: format!("http_{}", status),
                    error_description: body.clone(),
                }
            });
            return Err(match parsed.error.as_str() {
                "invalid_client" | "unauthorized_client" => AuthError::InvalidClient {
                    client_id: self.client_id.clone(),
                },
                "invalid_request" if parsed.error_description.contains("tenant") => {
                    AuthError::InvalidTenant {
                        tenant: self.tenant_id.clone(),
                    }
                }
                _ => AuthError::TokenAcquisition {
                    message: parsed.error_description,
                },
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64));
        Ok(AccessToken {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url_v2("my-tenant"),
            "https://login.microsoftonline.com/my-tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_scope_from_resource() {
        assert_eq!(
            scope_from_resource("https://env.operations.dynamics.com/"),
            "https://env.operations.dynamics.com/.default"
        );
    }

    #[test]
    fn test_expires_in_accepts_number_or_string() {
        let n: TokenResponse = serde_json::from_str(r#"{"access_token":"t","expires_in":3599}"#)
            .unwrap();
        assert_eq!(n.expires_in, Some(3599));

        let s: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":"3599"}"#).unwrap();
        assert_eq!(s.expires_in, Some(3599));
    }
}
