//! `database_role` and `server_role`: user-defined roles; Update renames in place

use super::{gone_if_missing, ignore_missing, role_not_found_kind, ManagedResource, ReadOutcome, ResourceKind};
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::Result;
use crate::model::{Role, RoleScope};
use async_trait::async_trait;
use std::sync::Arc;

/// `database_role` or `server_role`, depending on scope
pub struct RoleResource {
    connector: Arc<Connector>,
    scope: RoleScope,
}

impl RoleResource {
    pub fn new(connector: Arc<Connector>, scope: RoleScope) -> Self {
        Self { connector, scope }
    }
}

#[async_trait]
impl ManagedResource for RoleResource {
    type State = Role;

    fn kind(&self) -> ResourceKind {
        match self.scope {
            RoleScope::Server => ResourceKind::ServerRole,
            RoleScope::Database => ResourceKind::DatabaseRole,
        }
    }

    async fn create(&self, ctx: &OpContext, desired: &Role) -> Result<Role> {
        let repo = self.connector.repository(ctx).await?;
        repo.create_role(ctx, self.scope, desired).await
    }

    async fn read(&self, ctx: &OpContext, current: &Role) -> Result<ReadOutcome<Role>> {
        let repo = self.connector.repository(ctx).await?;
        gone_if_missing(
            self.kind(),
            &current.name,
            role_not_found_kind(self.scope),
            repo.get_role(ctx, self.scope, &current.name).await,
        )
    }

    async fn update(&self, ctx: &OpContext, prior: &Role, desired: &Role) -> Result<Role> {
        let repo = self.connector.repository(ctx).await?;
        repo.update_role(ctx, self.scope, &prior.name, desired).await
    }

    async fn delete(&self, ctx: &OpContext, current: &Role) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        ignore_missing(
            role_not_found_kind(self.scope),
            repo.delete_role(ctx, self.scope, &current.name).await,
        )
    }
}
