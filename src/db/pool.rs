//! bb8 connection manager for tiberius clients
//!
//! Every physical connection asks the auth source for credentials, so token
//! based logins always present a token that has not expired yet. Those
//! requests run under the connector's session context, bounded by the
//! connect timeout.

use crate::auth::AuthSource;
use crate::config::ConnectorConfig;
use crate::context::OpContext;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tiberius::{Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub type TdsClient = Client<Compat<TcpStream>>;

/// A pooled client plus a marker for abandoned statements
pub struct TdsConnection {
    pub client: TdsClient,
    /// Set while a statement is running; a dropped future leaves it set and
    /// the pool discards the connection instead of reusing a desynced stream
    pub in_flight: bool,
}

pub struct TdsConnectionManager {
    base: Config,
    auth: AuthSource,
    connect_timeout: std::time::Duration,
    session: OpContext,
}

impl TdsConnectionManager {
    /// `session` is cancelled when the owning connector closes
    pub fn new(cfg: &ConnectorConfig, auth: AuthSource, session: OpContext) -> Self {
        let mut config = Config::new();
        config.host(&cfg.host);
        config.port(cfg.port);
        config.database(&cfg.database);
        config.application_name("mssql_permissions");

        if cfg.trust_server_certificate {
            config.trust_cert();
        }
        if cfg.encrypt || auth.requires_encryption() {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        Self {
            base: config,
            auth,
            connect_timeout: cfg.connect_timeout,
            session,
        }
    }

    fn connect_context(&self) -> OpContext {
        self.session.child().with_deadline(Instant::now() + self.connect_timeout)
    }

    /// TCP + TDS login, following one gateway redirect if the server asks for it
    async fn connect_internal(&self, ctx: &OpContext) -> Result<TdsClient> {
        let mut config = self.base.clone();
        config.authentication(self.auth.auth_method(ctx).await?);

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| Error::Transient(format!("Failed to connect to SQL Server: {}", e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| Error::Transient(e.to_string()))?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            Err(tiberius::error::Error::Routing { host, port }) => {
                tracing::debug!(%host, port, "following gateway redirect");
                config.host(&host);
                config.port(port);
                let tcp = TcpStream::connect(config.get_addr())
                    .await
                    .map_err(|e| Error::Transient(format!("Failed to connect to {}:{}: {}", host, port, e)))?;
                tcp.set_nodelay(true)
                    .map_err(|e| Error::Transient(e.to_string()))?;
                Client::connect(config, tcp.compat_write())
                    .await
                    .map_err(Error::from_driver)
            }
            Err(e) => Err(Error::from_driver(e)),
        }
    }
}

#[async_trait]
impl bb8::ManageConnection for TdsConnectionManager {
    type Connection = TdsConnection;
    type Error = Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let ctx = self.connect_context();
        let client = ctx.run(self.connect_internal(&ctx)).await?;
        Ok(TdsConnection {
            client,
            in_flight: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.client
            .simple_query("SELECT 1")
            .await
            .map_err(Error::from_driver)?
            .into_row()
            .await
            .map_err(Error::from_driver)?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, TokenProvider, TokenSource};
    use crate::resources::test_support::connector_config;
    use bb8::ManageConnection;
    use std::sync::Arc;
    use std::time::Duration;

    /// An identity endpoint that never answers
    struct StalledSource;

    #[async_trait]
    impl TokenSource for StalledSource {
        fn describe(&self) -> String {
            "stalled".to_string()
        }

        async fn fetch(&self) -> Result<AccessToken> {
            std::future::pending().await
        }
    }

    fn manager(timeout: Duration, session: OpContext) -> TdsConnectionManager {
        let mut cfg = connector_config("appdb");
        cfg.connect_timeout = timeout;
        let auth = AuthSource::Token(Arc::new(TokenProvider::new(Box::new(StalledSource))));
        TdsConnectionManager::new(&cfg, auth, session)
    }

    #[tokio::test]
    async fn test_closed_session_stops_token_refresh() {
        let session = OpContext::new();
        let manager = manager(Duration::from_secs(30), session.clone());
        session.cancel();

        let err = manager.connect().await.err().unwrap();
        assert!(matches!(err, Error::Transient(ref m) if m.contains("cancelled")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_refresh_bounded_by_connect_timeout() {
        let manager = manager(Duration::from_millis(200), OpContext::new());

        let err = manager.connect().await.err().unwrap();
        assert!(matches!(err, Error::Transient(ref m) if m.contains("deadline exceeded")));
    }
}
