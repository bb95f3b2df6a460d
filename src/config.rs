//! Provider configuration
//!
//! The provider block supplied by the orchestrator, its validation, and the
//! conversion into connector parameters with exactly one auth variant.

use crate::auth::{ApplicationLogin, AuthConfig, FederatedToken, LocalLogin, ManagedIdentity};
use crate::error::{Error, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_port() -> u32 {
    1433
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SqlLoginBlock {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SpnLoginBlock {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Managed identity; both ids empty means system-assigned
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MsiLoginBlock {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FederatedLoginBlock {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// Provider-level configuration block
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    pub server_fqdn: String,
    #[serde(default = "default_port")]
    pub server_port: u32,
    pub database_name: String,
    #[serde(default)]
    pub sql_login: Option<SqlLoginBlock>,
    #[serde(default)]
    pub spn_login: Option<SpnLoginBlock>,
    #[serde(default)]
    pub msi_login: Option<MsiLoginBlock>,
    #[serde(default)]
    pub federated_login: Option<FederatedLoginBlock>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

/// Validated connection parameters handed to the connector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub auth: AuthConfig,
    pub connect_timeout: Duration,
    pub max_connections: u32,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
}

impl ProviderConfig {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| Error::invalid(format!("failed to parse provider config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON provider block from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))
            .map_err(Error::Unknown)?;
        Self::from_json_str(&contents)
    }

    /// Check required fields, port range and the single-login rule
    pub fn validate(&self) -> Result<()> {
        if self.server_fqdn.trim().is_empty() {
            return Err(Error::invalid("server_fqdn must not be empty"));
        }
        if self.database_name.trim().is_empty() {
            return Err(Error::invalid("database_name must not be empty"));
        }
        if !(1..=65535).contains(&self.server_port) {
            return Err(Error::invalid(format!(
                "server_port must be between 1 and 65535, got {}",
                self.server_port
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::invalid("connect_timeout_secs must be positive"));
        }
        if self.max_connections == 0 {
            return Err(Error::invalid("max_connections must be positive"));
        }

        let populated = [
            self.sql_login.is_some(),
            self.spn_login.is_some(),
            self.msi_login.is_some(),
            self.federated_login.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if populated != 1 {
            return Err(Error::invalid(format!(
                "exactly one of sql_login, spn_login, msi_login, federated_login must be set, got {}",
                populated
            )));
        }
        Ok(())
    }

    fn auth(&self) -> Result<AuthConfig> {
        if let Some(login) = &self.sql_login {
            return Ok(AuthConfig::LocalLogin(LocalLogin {
                username: login.username.clone(),
                password: login.password.clone(),
            }));
        }
        if let Some(spn) = &self.spn_login {
            return Ok(AuthConfig::ApplicationLogin(ApplicationLogin {
                tenant_id: spn.tenant_id.clone(),
                client_id: spn.client_id.clone(),
                client_secret: spn.client_secret.clone(),
            }));
        }
        if let Some(msi) = &self.msi_login {
            let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
            let identity = match (non_empty(&msi.user_id), non_empty(&msi.resource_id)) {
                (None, None) => ManagedIdentity::SystemAssigned,
                (Some(id), None) => ManagedIdentity::UserAssignedByClientId(id),
                (None, Some(id)) => ManagedIdentity::UserAssignedByResourceId(id),
                (Some(_), Some(_)) => {
                    return Err(Error::invalid("msi_login accepts user_id or resource_id, not both"))
                }
            };
            return Ok(AuthConfig::ManagedIdentity(identity));
        }
        if let Some(fed) = &self.federated_login {
            let token = match &fed.access_token {
                Some(tok) => FederatedToken::AccessToken(tok.clone()),
                None => FederatedToken::WorkloadIdentity {
                    tenant_id: fed.tenant_id.clone(),
                    client_id: fed.client_id.clone(),
                    token_file: fed.token_file.clone(),
                },
            };
            return Ok(AuthConfig::FederatedToken(token));
        }
        Err(Error::invalid("no login block configured"))
    }

    /// Validate and convert into connector parameters
    pub fn to_connector_config(&self) -> Result<ConnectorConfig> {
        self.validate()?;
        Ok(ConnectorConfig {
            host: self.server_fqdn.trim().to_string(),
            // range checked in validate()
            port: self.server_port as u16,
            database: self.database_name.trim().to_string(),
            auth: self.auth()?,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_connections: self.max_connections,
            encrypt: self.encrypt,
            trust_server_certificate: self.trust_server_certificate,
        })
    }
}

impl ConnectorConfig {
    /// Whether the initial catalog is the server's `master` database
    pub fn is_master(&self) -> bool {
        self.database.eq_ignore_ascii_case("master")
    }
}
