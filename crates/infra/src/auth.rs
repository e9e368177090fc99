//! OAuth2 client-credentials token providers
//!
//! Both upstream (Microsoft Graph) and downstream (ServiceTitan) use the
//! client-credentials grant. Tokens are cached per provider and refreshed
//! once they come within a safety margin of expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use techsync_domain::{GraphConfig, Result, ServiceTitanConfig, SyncError};
use tokio::sync::RwLock;
use tracing::debug;

use crate::retry::network_error;

/// Refresh when less than this much lifetime remains.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Supplies a bearer token for outgoing requests.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

/// Shared cache-and-refresh plumbing; the two providers differ only in the
/// form body and endpoint.
struct TokenCache {
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    fn new() -> Self {
        Self { cached: RwLock::new(None) }
    }

    async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TokenResponse>>,
    {
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        let mut guard = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        let response = refresh().await?;
        debug!(expires_in = response.expires_in, "access token refreshed");
        let token = CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        };
        *guard = Some(token);
        Ok(response.access_token)
    }
}

/// Azure AD token provider for Microsoft Graph.
pub struct AzureTokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cache: TokenCache,
}

impl AzureTokenProvider {
    pub fn new(client: Client, config: &GraphConfig) -> Self {
        Self {
            client,
            token_url: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                config.tenant_id
            ),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            cache: TokenCache::new(),
        }
    }

    /// Override the token endpoint, for tests.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| network_error("azure token request", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("azure token request: HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("azure token response: {e}")))
    }
}

#[async_trait]
impl AccessTokenProvider for AzureTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.cache.get_or_refresh(|| self.fetch()).await
    }
}

/// ServiceTitan token provider.
pub struct ServiceTitanTokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
}

impl ServiceTitanTokenProvider {
    pub fn new(client: Client, config: &ServiceTitanConfig) -> Self {
        Self {
            client,
            token_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cache: TokenCache::new(),
        }
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| network_error("servicetitan token request", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "servicetitan token request: HTTP {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("servicetitan token response: {e}")))
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceTitanTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.cache.get_or_refresh(|| self.fetch()).await
    }
}

/// Fixed-token provider for tests.
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn st_config(auth_url: String) -> ServiceTitanConfig {
        ServiceTitanConfig {
            tenant_id: "t1".into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            app_key: "appkey".into(),
            base_url: "unused".into(),
            auth_url,
        }
    }

    #[tokio::test]
    async fn token_is_fetched_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ServiceTitanTokenProvider::new(
            Client::new(),
            &st_config(format!("{}/connect/token", server.uri())),
        );

        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
        // Served from cache, no second HTTP call
        assert_eq!(provider.access_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-short",
                "expires_in": 10
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = ServiceTitanTokenProvider::new(
            Client::new(),
            &st_config(format!("{}/connect/token", server.uri())),
        );

        // Ten seconds is inside the refresh margin, so every call refetches
        provider.access_token().await.unwrap();
        provider.access_token().await.unwrap();
    }

    #[tokio::test]
    async fn auth_failure_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let provider = ServiceTitanTokenProvider::new(
            Client::new(),
            &st_config(format!("{}/connect/token", server.uri())),
        );

        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }
}
