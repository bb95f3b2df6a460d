//! Connector: lazily opened, cached database handle
//!
//! The first successful `connect` builds the pool, classifies the backend by
//! `SERVERPROPERTY('EngineEdition')` and caches both for the session.

use crate::auth::{self, AuthSource};
use crate::config::ConnectorConfig;
use crate::context::OpContext;
use crate::db::executor::Executor;
use crate::db::pool::TdsConnectionManager;
use crate::db::query::Statement;
use crate::db::sqlserver::SqlServerExecutor;
use crate::error::{Error, Result};
use crate::repo::Repository;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Backend engine edition as reported by `SERVERPROPERTY('EngineEdition')`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEdition {
    Personal,
    Standard,
    Enterprise,
    Express,
    AzureSqlDatabase,
    AzureSynapse,
    AzureSqlManagedInstance,
    AzureSqlEdge,
    Other(i64),
}

impl EngineEdition {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => EngineEdition::Personal,
            2 => EngineEdition::Standard,
            3 => EngineEdition::Enterprise,
            4 => EngineEdition::Express,
            5 => EngineEdition::AzureSqlDatabase,
            6 => EngineEdition::AzureSynapse,
            8 => EngineEdition::AzureSqlManagedInstance,
            9 => EngineEdition::AzureSqlEdge,
            other => EngineEdition::Other(other),
        }
    }

    /// Contained dialect: users without logins, server objects only in `master`
    pub fn is_contained(&self) -> bool {
        matches!(self, EngineEdition::AzureSqlDatabase)
    }
}

/// What the connector learned about the backend on first connect
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub edition: EngineEdition,
    /// Initial catalog of the connection
    pub database: String,
}

impl ServerInfo {
    pub fn is_master(&self) -> bool {
        self.database.eq_ignore_ascii_case("master")
    }

    pub fn is_contained(&self) -> bool {
        self.edition.is_contained()
    }
}

/// A live, shareable database handle
#[derive(Clone)]
pub struct Handle {
    pub executor: Arc<dyn Executor>,
    pub server: ServerInfo,
}

impl Handle {
    /// Repository bound to this handle
    pub fn repository(&self) -> Repository {
        Repository::new(Arc::clone(&self.executor), self.server.clone())
    }
}

/// Holds connection parameters and the handle opened from them
pub struct Connector {
    config: ConnectorConfig,
    auth: Option<AuthSource>,
    handle: OnceCell<Handle>,
    /// Parent of the contexts the pool uses for its own connects
    session: OpContext,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            auth: None,
            handle: OnceCell::new(),
            session: OpContext::new(),
        }
    }

    /// Use `auth` instead of resolving the configured variant on first connect
    pub fn with_auth_source(config: ConnectorConfig, auth: AuthSource) -> Self {
        Self {
            config,
            auth: Some(auth),
            handle: OnceCell::new(),
            session: OpContext::new(),
        }
    }

    /// A connector around a handle that is already open
    pub fn from_handle(config: ConnectorConfig, handle: Handle) -> Self {
        Self {
            config,
            auth: None,
            handle: OnceCell::new_with(Some(handle)),
            session: OpContext::new(),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Open the pool on first call; later calls return the cached handle.
    pub async fn connect(&self, ctx: &OpContext) -> Result<Handle> {
        let handle = self
            .handle
            .get_or_try_init(|| async { self.open(ctx).await })
            .await?;
        Ok(handle.clone())
    }

    pub async fn repository(&self, ctx: &OpContext) -> Result<Repository> {
        Ok(self.connect(ctx).await?.repository())
    }

    /// Abort token refreshes and connects the pool still has in flight
    pub fn close(&self) {
        self.session.cancel();
    }

    async fn open(&self, ctx: &OpContext) -> Result<Handle> {
        let source = match &self.auth {
            Some(source) => source.clone(),
            None => auth::resolve(&self.config.auth)?,
        };
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            auth = ?source,
            "opening connection pool"
        );

        // acquire the first token under the caller's context so a bad credential fails fast
        if let AuthSource::Token(provider) = &source {
            provider.token(ctx).await?;
        }

        let manager = TdsConnectionManager::new(&self.config, source, self.session.clone());
        let pool = ctx
            .run(async {
                bb8::Pool::builder()
                    .max_size(self.config.max_connections)
                    .connection_timeout(self.config.connect_timeout)
                    .retry_connection(false)
                    .build(manager)
                    .await
            })
            .await?;

        let executor: Arc<dyn Executor> = Arc::new(SqlServerExecutor::new(pool));
        let server = classify(executor.as_ref(), ctx, &self.config.database).await?;
        tracing::info!(
            host = %self.config.host,
            database = %server.database,
            edition = ?server.edition,
            "connected to SQL Server"
        );
        Ok(Handle { executor, server })
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.session.cancel();
    }
}

/// Query the engine edition and current catalog.
pub async fn classify(executor: &dyn Executor, ctx: &OpContext, database: &str) -> Result<ServerInfo> {
    let stmt = Statement::new(
        "SELECT CAST(SERVERPROPERTY('EngineEdition') AS bigint), DB_NAME()",
    );
    let row = executor
        .query_opt(ctx, &stmt)
        .await?
        .ok_or_else(|| Error::unknown("server did not report its engine edition"))?;
    let edition = EngineEdition::from_code(row.get_i64(0)?);
    let current = row.get_string(1)?;
    Ok(ServerInfo {
        edition,
        database: if current.is_empty() { database.to_string() } else { current },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeExecutor;
    use crate::db::query::{CellValue, Record};

    #[test]
    fn test_edition_codes() {
        assert!(EngineEdition::from_code(5).is_contained());
        assert!(!EngineEdition::from_code(8).is_contained());
        assert_eq!(EngineEdition::from_code(42), EngineEdition::Other(42));
    }

    #[tokio::test]
    async fn test_classify_azure_sql_database() {
        let fake = FakeExecutor::new();
        fake.respond(
            "EngineEdition",
            vec![Record::new(vec![CellValue::Int(5), CellValue::String("master".into())])],
        );
        let info = classify(&fake, &OpContext::new(), "master").await.unwrap();
        assert!(info.is_contained());
        assert!(info.is_master());
    }

    #[tokio::test]
    async fn test_classify_boxed_server() {
        let fake = FakeExecutor::new();
        fake.respond(
            "EngineEdition",
            vec![Record::new(vec![CellValue::Int(3), CellValue::String("appdb".into())])],
        );
        let info = classify(&fake, &OpContext::new(), "appdb").await.unwrap();
        assert_eq!(info.edition, EngineEdition::Enterprise);
        assert!(!info.is_master());
    }
}
