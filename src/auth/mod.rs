//! Authentication variants and their resolution into a driver auth source

mod token;

pub use token::{
    AccessToken, EntraCredentialSource, ManagedIdentitySelector, StaticTokenSource, TokenProvider, TokenSource,
    SQL_SCOPE,
};
#[cfg(test)]
pub(crate) use token::credential_error;

use crate::context::OpContext;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tiberius::AuthMethod;

/// SQL authentication with username and password
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalLogin {
    pub username: String,
    pub password: String,
}

/// Entra ID service principal with a client secret
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationLogin {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedIdentity {
    SystemAssigned,
    UserAssignedByClientId(String),
    UserAssignedByResourceId(String),
}

/// A federated credential: either a ready SQL token or a workload identity assertion to exchange
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FederatedToken {
    AccessToken(String),
    /// Missing fields are discovered from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`
    /// and `AZURE_FEDERATED_TOKEN_FILE`
    WorkloadIdentity {
        tenant_id: Option<String>,
        client_id: Option<String>,
        token_file: Option<PathBuf>,
    },
}

/// Exactly one way of authenticating to the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthConfig {
    LocalLogin(LocalLogin),
    ApplicationLogin(ApplicationLogin),
    ManagedIdentity(ManagedIdentity),
    FederatedToken(FederatedToken),
}

impl std::fmt::Debug for LocalLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLogin")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for ApplicationLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationLogin")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for FederatedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FederatedToken::AccessToken(_) => f.debug_tuple("AccessToken").field(&"<redacted>").finish(),
            FederatedToken::WorkloadIdentity {
                tenant_id,
                client_id,
                token_file,
            } => f
                .debug_struct("WorkloadIdentity")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("token_file", token_file)
                .finish(),
        }
    }
}

/// What the connection manager hands to tiberius for each new connection
#[derive(Clone)]
pub enum AuthSource {
    SqlServer { username: String, password: String },
    Token(Arc<TokenProvider>),
}

impl AuthSource {
    /// Build the driver auth method, acquiring or refreshing a token if needed.
    pub async fn auth_method(&self, ctx: &OpContext) -> Result<AuthMethod> {
        match self {
            AuthSource::SqlServer { username, password } => Ok(AuthMethod::sql_server(username, password)),
            AuthSource::Token(provider) => Ok(AuthMethod::aad_token(provider.token(ctx).await?)),
        }
    }

    /// Token authentication is only accepted over TLS
    pub fn requires_encryption(&self) -> bool {
        matches!(self, AuthSource::Token(_))
    }
}

impl std::fmt::Debug for AuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSource::SqlServer { username, .. } => write!(f, "SqlServer({})", username),
            AuthSource::Token(provider) => write!(f, "Token({})", provider.describe()),
        }
    }
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn env_fallback(value: &Option<String>, var: &str) -> Option<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
}

/// Resolve an authentication variant into a driver-ready auth source.
pub fn resolve(auth: &AuthConfig) -> Result<AuthSource> {
    match auth {
        AuthConfig::LocalLogin(login) => {
            required("sql_login.username", &login.username)?;
            Ok(AuthSource::SqlServer {
                username: login.username.clone(),
                password: login.password.clone(),
            })
        }
        AuthConfig::ApplicationLogin(app) => {
            required("spn_login.tenant_id", &app.tenant_id)?;
            required("spn_login.client_id", &app.client_id)?;
            required("spn_login.client_secret", &app.client_secret)?;
            let source = EntraCredentialSource::client_secret(&app.tenant_id, &app.client_id, &app.client_secret)?;
            Ok(token_source(source))
        }
        AuthConfig::ManagedIdentity(identity) => {
            let selector = match identity {
                ManagedIdentity::SystemAssigned => ManagedIdentitySelector::SystemAssigned,
                ManagedIdentity::UserAssignedByClientId(id) => {
                    required("msi_login.user_id", id)?;
                    ManagedIdentitySelector::ClientId(id.clone())
                }
                ManagedIdentity::UserAssignedByResourceId(id) => {
                    required("msi_login.resource_id", id)?;
                    ManagedIdentitySelector::ResourceId(id.clone())
                }
            };
            Ok(token_source(EntraCredentialSource::managed_identity(selector)?))
        }
        AuthConfig::FederatedToken(FederatedToken::AccessToken(tok)) => {
            required("federated_login.access_token", tok)?;
            Ok(token_source(StaticTokenSource::new(tok)))
        }
        AuthConfig::FederatedToken(FederatedToken::WorkloadIdentity {
            tenant_id,
            client_id,
            token_file,
        }) => {
            let tenant_id = env_fallback(tenant_id, "AZURE_TENANT_ID")
                .ok_or_else(|| Error::invalid("federated_login.tenant_id is not set and AZURE_TENANT_ID is empty"))?;
            let client_id = env_fallback(client_id, "AZURE_CLIENT_ID")
                .ok_or_else(|| Error::invalid("federated_login.client_id is not set and AZURE_CLIENT_ID is empty"))?;
            let file = token_file
                .clone()
                .or_else(|| std::env::var_os("AZURE_FEDERATED_TOKEN_FILE").map(PathBuf::from))
                .ok_or_else(|| {
                    Error::invalid("federated_login.token_file is not set and AZURE_FEDERATED_TOKEN_FILE is empty")
                })?;
            let source = EntraCredentialSource::workload_identity(&tenant_id, &client_id, file)?;
            Ok(token_source(source))
        }
    }
}

fn token_source(source: impl TokenSource + 'static) -> AuthSource {
    AuthSource::Token(Arc::new(TokenProvider::new(Box::new(source))))
}
