//! Bearer-token sources for the ARM API.
//!
//! [`DefaultAzureCredential`] tries a service principal from the standard
//! `AZURE_*` environment variables first, then falls back to the Azure CLI's
//! logged-in account.

use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Resource the ARM tokens are issued for.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Anything able to produce a bearer token for the management API.
#[async_trait]
pub trait TokenCredential: Send + Sync + 'static {
    async fn token(&self) -> Result<String>;

    /// Short label used in diagnostics.
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct AccessToken {
    secret: String,
    expires_at: SystemTime,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .duration_since(SystemTime::now())
            .is_ok_and(|left| left > EXPIRY_MARGIN)
    }
}

/// Holds the last token a credential fetched.
#[derive(Default)]
struct TokenCache {
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken>>,
    {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.secret.clone());
        }
        let token = refresh().await?;
        let secret = token.secret.clone();
        *current = Some(token);
        Ok(secret)
    }
}

// ── Static ──────────────────────────────────────────────────────────

/// A fixed, caller-supplied token.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// ── Service principal ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 client-credentials flow for a service principal.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    http: reqwest::Client,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.into(),
            http: reqwest::Client::new(),
            cache: TokenCache::default(),
        }
    }

    /// Create from env vars: `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
    /// `AZURE_CLIENT_SECRET` (all required) and `AZURE_AUTHORITY_HOST`.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            env::var(name).map_err(|_| Error::Credential(format!("missing env var: {name}")))
        };

        let mut credential = Self::new(
            var("AZURE_TENANT_ID")?,
            var("AZURE_CLIENT_ID")?,
            var("AZURE_CLIENT_SECRET")?,
        );
        if let Ok(host) = env::var("AZURE_AUTHORITY_HOST") {
            credential = credential.with_authority_host(host);
        }
        Ok(credential)
    }

    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into().trim_end_matches('/').to_string();
        self
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        );

        let resp = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = resp.json().await?;
        Ok(AccessToken {
            secret: token.access_token,
            expires_at: SystemTime::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String> {
        self.cache.get_or_refresh(|| self.request_token()).await
    }

    fn name(&self) -> &'static str {
        "environment"
    }
}

// ── Azure CLI ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Unix timestamp; older CLI releases only emit the local-time `expiresOn`.
    #[serde(default, rename = "expires_on")]
    expires_on: Option<u64>,
}

/// Borrows the token of the account logged in with `az login`.
#[derive(Default)]
pub struct AzureCliCredential {
    cache: TokenCache,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::default()
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let output = Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                MANAGEMENT_RESOURCE,
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| Error::Credential(format!("failed to run az: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Credential(format!(
                "az account get-access-token failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let token: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Credential(format!("unreadable az output: {e}")))?;

        // Without a machine-readable expiry, only trust the token briefly.
        let expires_at = match token.expires_on {
            Some(secs) => UNIX_EPOCH + Duration::from_secs(secs),
            None => SystemTime::now() + EXPIRY_MARGIN * 2,
        };

        Ok(AccessToken {
            secret: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn token(&self) -> Result<String> {
        self.cache.get_or_refresh(|| self.request_token()).await
    }

    fn name(&self) -> &'static str {
        "azure-cli"
    }
}

// ── Chain ───────────────────────────────────────────────────────────

/// Tries each source in order; the first one to produce a token wins.
pub struct DefaultAzureCredential {
    sources: Vec<Box<dyn TokenCredential>>,
}

impl DefaultAzureCredential {
    pub fn new(sources: Vec<Box<dyn TokenCredential>>) -> Self {
        Self { sources }
    }

    /// Environment service principal (when configured), then Azure CLI.
    pub fn from_env() -> Self {
        let mut sources: Vec<Box<dyn TokenCredential>> = Vec::new();

        match ClientSecretCredential::from_env() {
            Ok(c) => {
                tracing::debug!("using service principal from environment");
                sources.push(Box::new(c));
            }
            Err(e) => tracing::debug!("skipping environment credential: {e}"),
        }

        sources.push(Box::new(AzureCliCredential::new()));
        Self { sources }
    }
}

#[async_trait]
impl TokenCredential for DefaultAzureCredential {
    async fn token(&self) -> Result<String> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.token().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::debug!(source = source.name(), error = %e, "credential source failed");
                    failures.push(format!("{}: {e}", source.name()));
                }
            }
        }

        Err(Error::Credential(format!(
            "no credential source produced a token ({})",
            failures.join("; ")
        )))
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl TokenCredential for Failing {
        async fn token(&self) -> Result<String> {
            Err(Error::Credential("nope".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn chain_falls_through_to_first_working_source() {
        let chain = DefaultAzureCredential::new(vec![
            Box::new(Failing),
            Box::new(StaticTokenCredential::new("tok")),
        ]);
        assert_eq!(chain.token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn chain_reports_every_failure() {
        let chain = DefaultAzureCredential::new(vec![Box::new(Failing), Box::new(Failing)]);
        let err = chain.token().await.unwrap_err().to_string();
        assert_eq!(err.matches("failing: ").count(), 2, "{err}");
    }

    #[tokio::test]
    async fn cache_reuses_fresh_token() {
        let cache = TokenCache::default();
        let first = cache
            .get_or_refresh(|| async {
                Ok(AccessToken {
                    secret: "a".into(),
                    expires_at: SystemTime::now() + Duration::from_secs(3600),
                })
            })
            .await
            .unwrap();
        let second = cache
            .get_or_refresh(|| async { Err(Error::Credential("should not refresh".into())) })
            .await
            .unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "a");
    }

    #[tokio::test]
    async fn cache_refreshes_token_near_expiry() {
        let cache = TokenCache::default();
        cache
            .get_or_refresh(|| async {
                Ok(AccessToken {
                    secret: "old".into(),
                    expires_at: SystemTime::now() + Duration::from_secs(60),
                })
            })
            .await
            .unwrap();
        let token = cache
            .get_or_refresh(|| async {
                Ok(AccessToken {
                    secret: "new".into(),
                    expires_at: SystemTime::now() + Duration::from_secs(3600),
                })
            })
            .await
            .unwrap();
        assert_eq!(token, "new");
    }
}
