//! Repositories for logins, users, roles, memberships and permissions
//!
//! One [`Repository`] per handle; its operations are split by concern across
//! `principal`, `role` and `permission`.

mod permission;
mod principal;
mod role;

use crate::context::OpContext;
use crate::db::{Executor, Record, ServerInfo, Statement};
use crate::error::{Error, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct Repository {
    executor: Arc<dyn Executor>,
    server: ServerInfo,
}

impl Repository {
    pub fn new(executor: Arc<dyn Executor>, server: ServerInfo) -> Self {
        Self { executor, server }
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    async fn exec(&self, ctx: &OpContext, stmt: &Statement) -> Result<u64> {
        self.executor.execute(ctx, stmt).await
    }

    async fn fetch(&self, ctx: &OpContext, stmt: &Statement) -> Result<Vec<Record>> {
        self.executor.query(ctx, stmt).await
    }

    async fn fetch_one(&self, ctx: &OpContext, stmt: &Statement) -> Result<Option<Record>> {
        self.executor.query_opt(ctx, stmt).await
    }

    /// Server-scoped objects are only managed from the `master` catalog
    fn require_master(&self, what: &str) -> Result<()> {
        if !self.server.is_master() {
            return Err(Error::invalid(format!(
                "{} can only be managed when connected to the master database, not '{}'",
                what, self.server.database
            )));
        }
        Ok(())
    }

    /// Logins exist per server; on Azure SQL Database only `master` can see them
    fn require_login_catalog(&self) -> Result<()> {
        if self.server.is_contained() {
            self.require_master("logins")?;
        }
        Ok(())
    }
}
