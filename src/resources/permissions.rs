//! `permissions_to_role` and `schema_permissions`
//!
//! Both are keyed on a database role. Create applies the minimal diff against
//! what the role holds; Update revokes the prior set and grants the desired one
//! whenever the two differ. If the role disappears, Read reports the object as gone.

use super::{gone_if_missing, ManagedResource, ReadOutcome, ResourceKind};
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{PermissionGrant, Role, RoleScope};
use crate::reconcile::{
    apply_permission_plan, check_unique_permissions, observe_permissions, reconcile_permissions,
    DatabasePermissions, PermissionPlan, PermissionStore, SchemaPermissions,
};
use crate::repo::Repository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Database-scoped permissions held by one role
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissions {
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
}

/// Permissions held by one role on one schema
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSchemaPermissions {
    pub schema: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
}

async fn resolve_role(repo: &Repository, ctx: &OpContext, name: &str) -> Result<Role> {
    repo.get_role(ctx, RoleScope::Database, name).await
}

async fn revoke_all(store: &dyn PermissionStore, ctx: &OpContext, permissions: &[PermissionGrant]) -> Result<()> {
    let plan = PermissionPlan {
        revoke: permissions.to_vec(),
        grant: Vec::new(),
    };
    apply_permission_plan(store, ctx, &plan).await
}

pub struct RolePermissionsResource {
    connector: Arc<Connector>,
}

impl RolePermissionsResource {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ManagedResource for RolePermissionsResource {
    type State = RolePermissions;

    fn kind(&self) -> ResourceKind {
        ResourceKind::PermissionsToRole
    }

    async fn create(&self, ctx: &OpContext, desired: &RolePermissions) -> Result<RolePermissions> {
        let repo = self.connector.repository(ctx).await?;
        let role = resolve_role(&repo, ctx, &desired.role).await?;
        let store = DatabasePermissions::new(&repo, &role);
        reconcile_permissions(&store, ctx, &desired.permissions).await?;
        Ok(RolePermissions {
            role: desired.role.clone(),
            permissions: observe_permissions(&store, ctx, &desired.permissions).await?,
        })
    }

    async fn read(&self, ctx: &OpContext, current: &RolePermissions) -> Result<ReadOutcome<RolePermissions>> {
        let repo = self.connector.repository(ctx).await?;
        let role = match gone_if_missing(
            self.kind(),
            &current.role,
            NotFoundKind::DatabaseRole,
            resolve_role(&repo, ctx, &current.role).await,
        )? {
            ReadOutcome::Present(role) => role,
            ReadOutcome::Gone => return Ok(ReadOutcome::Gone),
        };
        let store = DatabasePermissions::new(&repo, &role);
        Ok(ReadOutcome::Present(RolePermissions {
            role: current.role.clone(),
            permissions: observe_permissions(&store, ctx, &current.permissions).await?,
        }))
    }

    async fn update(&self, ctx: &OpContext, prior: &RolePermissions, desired: &RolePermissions) -> Result<RolePermissions> {
        if !prior.role.eq_ignore_ascii_case(&desired.role) {
            return Err(Error::invalid("changing the role of a permissions resource requires replacing it"));
        }
        check_unique_permissions(&desired.permissions)?;
        let repo = self.connector.repository(ctx).await?;
        let role = resolve_role(&repo, ctx, &desired.role).await?;
        let store = DatabasePermissions::new(&repo, &role);
        let plan = PermissionPlan::replace_all(&prior.permissions, &desired.permissions);
        apply_permission_plan(&store, ctx, &plan).await?;
        Ok(RolePermissions {
            role: desired.role.clone(),
            permissions: observe_permissions(&store, ctx, &desired.permissions).await?,
        })
    }

    async fn delete(&self, ctx: &OpContext, current: &RolePermissions) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        let role = match resolve_role(&repo, ctx, &current.role).await {
            Ok(role) => role,
            Err(e) if e.is_not_found_of(NotFoundKind::DatabaseRole) => return Ok(()),
            Err(e) => return Err(e),
        };
        revoke_all(&DatabasePermissions::new(&repo, &role), ctx, &current.permissions).await
    }
}

pub struct SchemaPermissionsResource {
    connector: Arc<Connector>,
}

impl SchemaPermissionsResource {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ManagedResource for SchemaPermissionsResource {
    type State = RoleSchemaPermissions;

    fn kind(&self) -> ResourceKind {
        ResourceKind::SchemaPermissions
    }

    async fn create(&self, ctx: &OpContext, desired: &RoleSchemaPermissions) -> Result<RoleSchemaPermissions> {
        let repo = self.connector.repository(ctx).await?;
        let role = resolve_role(&repo, ctx, &desired.role).await?;
        let store = SchemaPermissions::new(&repo, &role, &desired.schema);
        reconcile_permissions(&store, ctx, &desired.permissions).await?;
        Ok(RoleSchemaPermissions {
            permissions: observe_permissions(&store, ctx, &desired.permissions).await?,
            ..desired.clone()
        })
    }

    async fn read(&self, ctx: &OpContext, current: &RoleSchemaPermissions) -> Result<ReadOutcome<RoleSchemaPermissions>> {
        let repo = self.connector.repository(ctx).await?;
        let role = match gone_if_missing(
            self.kind(),
            &format!("{}/{}", current.schema, current.role),
            NotFoundKind::DatabaseRole,
            resolve_role(&repo, ctx, &current.role).await,
        )? {
            ReadOutcome::Present(role) => role,
            ReadOutcome::Gone => return Ok(ReadOutcome::Gone),
        };
        let store = SchemaPermissions::new(&repo, &role, &current.schema);
        Ok(ReadOutcome::Present(RoleSchemaPermissions {
            permissions: observe_permissions(&store, ctx, &current.permissions).await?,
            ..current.clone()
        }))
    }

    async fn update(
        &self,
        ctx: &OpContext,
        prior: &RoleSchemaPermissions,
        desired: &RoleSchemaPermissions,
    ) -> Result<RoleSchemaPermissions> {
        if !prior.role.eq_ignore_ascii_case(&desired.role) || !prior.schema.eq_ignore_ascii_case(&desired.schema) {
            return Err(Error::invalid(
                "changing the role or schema of a schema permissions resource requires replacing it",
            ));
        }
        check_unique_permissions(&desired.permissions)?;
        let repo = self.connector.repository(ctx).await?;
        let role = resolve_role(&repo, ctx, &desired.role).await?;
        let store = SchemaPermissions::new(&repo, &role, &desired.schema);
        let plan = PermissionPlan::replace_all(&prior.permissions, &desired.permissions);
        apply_permission_plan(&store, ctx, &plan).await?;
        Ok(RoleSchemaPermissions {
            permissions: observe_permissions(&store, ctx, &desired.permissions).await?,
            ..desired.clone()
        })
    }

    async fn delete(&self, ctx: &OpContext, current: &RoleSchemaPermissions) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        let role = match resolve_role(&repo, ctx, &current.role).await {
            Ok(role) => role,
            Err(e) if e.is_not_found_of(NotFoundKind::DatabaseRole) => return Ok(()),
            Err(e) => return Err(e),
        };
        let store = SchemaPermissions::new(&repo, &role, &current.schema);
        revoke_all(&store, ctx, &current.permissions).await
    }
}
