//! Access-token acquisition for Azure SQL
//!
//! Entra ID credentials come from `azure_identity`. [`TokenProvider`] caches the
//! last token and re-acquires it before it expires so long-lived pooled
//! connections keep authenticating.

use crate::context::OpContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use azure_core::credentials::{Secret, TokenCredential};
use azure_identity::{
    ClientSecretCredential, ManagedIdentityCredential, ManagedIdentityCredentialOptions, UserAssignedId,
    WorkloadIdentityCredential, WorkloadIdentityCredentialOptions,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// OAuth v2 scope of Azure SQL
pub const SQL_SCOPE: &str = "https://database.windows.net/.default";

/// Re-acquire tokens with less than this much validity left
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is still usable for at least `margin`
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
        self.expires_at - margin > now
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A way of obtaining a fresh SQL-audience token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name for logs
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<AccessToken>;
}

/// Caches tokens from a [`TokenSource`] and refreshes them ahead of expiry.
pub struct TokenProvider {
    source: Box<dyn TokenSource>,
    cached: Mutex<Option<AccessToken>>,
    refresh_margin: ChronoDuration,
}

impl TokenProvider {
    pub fn new(source: Box<dyn TokenSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
            refresh_margin: ChronoDuration::seconds(REFRESH_MARGIN_SECS),
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Return a token valid for at least the refresh margin.
    pub async fn token(&self, ctx: &OpContext) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(tok) = cached.as_ref() {
            if tok.is_fresh(Utc::now(), self.refresh_margin) {
                return Ok(tok.token.clone());
            }
        }

        tracing::debug!(source = %self.source.describe(), "acquiring access token");
        let fresh = ctx.run(self.source.fetch()).await?;
        let value = fresh.token.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("source", &self.source.describe())
            .finish()
    }
}

/// Token request failed upstream; the credential's message is kept verbatim.
pub(crate) fn credential_error(err: azure_core::Error) -> Error {
    Error::AuthFailed(err.to_string())
}

fn setup_error(what: &str, err: azure_core::Error) -> Error {
    Error::invalid(format!("{}: {}", what, err))
}

/// Which managed identity to request a token for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagedIdentitySelector {
    SystemAssigned,
    ClientId(String),
    ResourceId(String),
}

/// An `azure_identity` credential asked for the Azure SQL scope
pub struct EntraCredentialSource {
    credential: Arc<dyn TokenCredential>,
    label: String,
}

impl EntraCredentialSource {
    fn new(credential: Arc<dyn TokenCredential>, label: String) -> Self {
        Self { credential, label }
    }

    /// Service principal with a client secret
    pub fn client_secret(tenant_id: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        let credential = ClientSecretCredential::new(
            tenant_id,
            client_id.to_string(),
            Secret::new(client_secret.to_string()),
            None,
        )
        .map_err(|e| setup_error("spn_login", e))?;
        Ok(Self::new(credential, format!("client secret for {}", client_id)))
    }

    /// App Service or IMDS identity endpoint, whichever the host provides
    pub fn managed_identity(selector: ManagedIdentitySelector) -> Result<Self> {
        let (user_assigned_id, label) = match selector {
            ManagedIdentitySelector::SystemAssigned => (None, "system-assigned managed identity".to_string()),
            ManagedIdentitySelector::ClientId(id) => {
                let label = format!("managed identity client id {}", id);
                (Some(UserAssignedId::ClientId(id)), label)
            }
            ManagedIdentitySelector::ResourceId(id) => {
                let label = format!("managed identity {}", id);
                (Some(UserAssignedId::ResourceId(id)), label)
            }
        };
        let options = ManagedIdentityCredentialOptions {
            user_assigned_id,
            ..Default::default()
        };
        let credential = ManagedIdentityCredential::new(Some(options)).map_err(|e| setup_error("msi_login", e))?;
        Ok(Self::new(credential, label))
    }

    /// Federated client assertion read from `token_file`, which workload identity rotates
    pub fn workload_identity(tenant_id: &str, client_id: &str, token_file: PathBuf) -> Result<Self> {
        let options = WorkloadIdentityCredentialOptions {
            tenant_id: Some(tenant_id.to_string()),
            client_id: Some(client_id.to_string()),
            token_file_path: Some(token_file),
            ..Default::default()
        };
        let credential =
            WorkloadIdentityCredential::new(Some(options)).map_err(|e| setup_error("federated_login", e))?;
        Ok(Self::new(credential, format!("workload identity for {}", client_id)))
    }
}

#[async_trait]
impl TokenSource for EntraCredentialSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let token = self
            .credential
            .get_token(&[SQL_SCOPE], None)
            .await
            .map_err(credential_error)?;
        let expires_at = DateTime::<Utc>::from_timestamp(token.expires_on.unix_timestamp(), 0)
            .unwrap_or_else(|| Utc::now() + ChronoDuration::seconds(REFRESH_MARGIN_SECS * 2));
        Ok(AccessToken {
            token: token.token.secret().to_string(),
            expires_at,
        })
    }
}

/// A pre-acquired access token, used as-is
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn describe(&self) -> String {
        "pre-acquired access token".to_string()
    }

    async fn fetch(&self) -> Result<AccessToken> {
        // the issuer decides the lifetime; nothing to refresh from here
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azure_core::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        lifetime: ChronoDuration,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        fn describe(&self) -> String {
            "counting".to_string()
        }

        async fn fetch(&self) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: format!("token-{}", n),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TokenSource for FailingSource {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        async fn fetch(&self) -> Result<AccessToken> {
            Err(credential_error(azure_core::Error::new(
                ErrorKind::Credential,
                "AADSTS7000215: Invalid client secret provided.",
            )))
        }
    }

    #[tokio::test]
    async fn test_token_is_cached_while_fresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(Box::new(CountingSource {
            calls: Arc::clone(&calls),
            lifetime: ChronoDuration::hours(1),
        }));
        let ctx = OpContext::new();
        assert_eq!(provider.token(&ctx).await.unwrap(), "token-1");
        assert_eq!(provider.token(&ctx).await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_refreshed_inside_margin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = TokenProvider::new(Box::new(CountingSource {
            calls: Arc::clone(&calls),
            lifetime: ChronoDuration::seconds(60),
        }));
        let ctx = OpContext::new();
        assert_eq!(provider.token(&ctx).await.unwrap(), "token-1");
        assert_eq!(provider.token(&ctx).await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_failure_keeps_upstream_reason() {
        let provider = TokenProvider::new(Box::new(FailingSource));
        let err = provider.token(&OpContext::new()).await.unwrap_err();
        assert!(matches!(err, Error::AuthFailed(ref m) if m.contains("AADSTS7000215")));
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_refresh() {
        let provider = TokenProvider::new(Box::new(FailingSource));
        let ctx = OpContext::new();
        ctx.cancel();
        let err = provider.token(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[test]
    fn test_client_secret_source_label() {
        let source = EntraCredentialSource::client_secret(
            "00000000-0000-0000-0000-000000000001",
            "00000000-0000-0000-0000-000000000002",
            "s3cret",
        )
        .unwrap();
        assert_eq!(
            source.describe(),
            "client secret for 00000000-0000-0000-0000-000000000002"
        );
    }
}
