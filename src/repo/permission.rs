//! Permissions granted to roles at database, schema and server scope

use super::Repository;
use crate::context::OpContext;
use crate::db::Record;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{Permission, PermissionClass, PermissionState, Role, RoleScope, SchemaPermission};
use crate::sql::statements::{self, PermissionTarget};
use crate::sql::validate_identifier;

fn permission_from_record(rec: &Record) -> Result<Permission> {
    Ok(Permission {
        name: rec.get_string(0)?,
        class: PermissionClass::from_code(rec.get_i64(1)?),
        class_desc: rec.get_string(2)?,
        major_id: rec.get_i64(3)?,
        minor_id: rec.get_i64(4)?,
        grantee_principal_id: rec.get_i64(5)?,
        grantor_principal_id: rec.get_i64(6)?,
        permission_type: rec.get_code(7)?,
        state: PermissionState::from_code(&rec.get_code(8)?)?,
        state_desc: rec.get_string(9)?,
    })
}

impl Repository {
    /// Principal id of `role`, looked up when the caller only knows the name
    async fn grantee_id(&self, ctx: &OpContext, scope: RoleScope, role: &Role) -> Result<i64> {
        if role.principal_id > 0 {
            return Ok(role.principal_id);
        }
        Ok(self.get_role(ctx, scope, &role.name).await?.principal_id)
    }

    async fn apply_grant(&self, ctx: &OpContext, target: PermissionTarget<'_>, role: &Role, permission: &Permission) -> Result<()> {
        validate_identifier(&role.name)?;
        let stmt = statements::grant_permission(target, &role.name, &permission.name, permission.state)?;
        self.exec(ctx, &stmt).await?;
        tracing::info!(role = %role.name, permission = %permission.name, state = permission.state.code(), ?target, "granted permission");
        Ok(())
    }

    async fn apply_revoke(&self, ctx: &OpContext, target: PermissionTarget<'_>, role: &Role, permission: &Permission) -> Result<()> {
        validate_identifier(&role.name)?;
        let stmt = statements::revoke_permission(target, &role.name, &permission.name, permission.state)?;
        self.exec(ctx, &stmt).await?;
        tracing::info!(role = %role.name, permission = %permission.name, ?target, "revoked permission");
        Ok(())
    }

    async fn list_permissions(
        &self,
        ctx: &OpContext,
        target: PermissionTarget<'_>,
        grantee: i64,
        name: Option<&str>,
    ) -> Result<Vec<Permission>> {
        let rows = self.fetch(ctx, &statements::select_permissions(target, grantee, name)?).await?;
        rows.iter().map(permission_from_record).collect()
    }

    // ---- database scope ----

    /// `GRANT`, or `DENY` when the permission's state is `D`
    pub async fn grant_permission_to_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<()> {
        self.apply_grant(ctx, PermissionTarget::Database, role, permission).await
    }

    pub async fn revoke_permission_from_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<()> {
        self.apply_revoke(ctx, PermissionTarget::Database, role, permission).await
    }

    pub async fn get_database_permission_for_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<Permission> {
        let grantee = self.grantee_id(ctx, RoleScope::Database, role).await?;
        self.list_permissions(ctx, PermissionTarget::Database, grantee, Some(&permission.name))
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound(NotFoundKind::Permissions))
    }

    pub async fn get_database_permissions_for_role(&self, ctx: &OpContext, role: &Role) -> Result<Vec<Permission>> {
        let grantee = self.grantee_id(ctx, RoleScope::Database, role).await?;
        self.list_permissions(ctx, PermissionTarget::Database, grantee, None).await
    }

    // ---- schema scope ----

    pub async fn assign_permission_on_schema_to_role(
        &self,
        ctx: &OpContext,
        role: &Role,
        schema: &str,
        permission: &Permission,
    ) -> Result<()> {
        validate_identifier(schema)?;
        self.apply_grant(ctx, PermissionTarget::Schema(schema), role, permission).await
    }

    pub async fn revoke_permission_on_schema_from_role(
        &self,
        ctx: &OpContext,
        role: &Role,
        schema: &str,
        permission: &Permission,
    ) -> Result<()> {
        validate_identifier(schema)?;
        self.apply_revoke(ctx, PermissionTarget::Schema(schema), role, permission).await
    }

    pub async fn get_schema_permission_for_role(
        &self,
        ctx: &OpContext,
        role: &Role,
        schema: &str,
        permission: &Permission,
    ) -> Result<SchemaPermission> {
        validate_identifier(schema)?;
        let grantee = self.grantee_id(ctx, RoleScope::Database, role).await?;
        let found = self
            .list_permissions(ctx, PermissionTarget::Schema(schema), grantee, Some(&permission.name))
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound(NotFoundKind::Permissions))?;
        Ok(SchemaPermission {
            schema_name: schema.to_string(),
            permission: found,
        })
    }

    pub async fn get_schema_permissions_for_role(
        &self,
        ctx: &OpContext,
        role: &Role,
        schema: &str,
    ) -> Result<Vec<SchemaPermission>> {
        validate_identifier(schema)?;
        let grantee = self.grantee_id(ctx, RoleScope::Database, role).await?;
        let rows = self
            .list_permissions(ctx, PermissionTarget::Schema(schema), grantee, None)
            .await?;
        Ok(rows
            .into_iter()
            .map(|permission| SchemaPermission {
                schema_name: schema.to_string(),
                permission,
            })
            .collect())
    }

    // ---- server scope (master only) ----

    pub async fn grant_server_permission_to_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<()> {
        self.require_master("server permissions")?;
        self.apply_grant(ctx, PermissionTarget::Server, role, permission).await
    }

    pub async fn revoke_server_permission_from_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<()> {
        self.require_master("server permissions")?;
        self.apply_revoke(ctx, PermissionTarget::Server, role, permission).await
    }

    pub async fn get_server_permission_for_role(&self, ctx: &OpContext, role: &Role, permission: &Permission) -> Result<Permission> {
        self.require_master("server permissions")?;
        let grantee = self.grantee_id(ctx, RoleScope::Server, role).await?;
        self.list_permissions(ctx, PermissionTarget::Server, grantee, Some(&permission.name))
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound(NotFoundKind::Permissions))
    }

    pub async fn get_server_permissions_for_role(&self, ctx: &OpContext, role: &Role) -> Result<Vec<Permission>> {
        self.require_master("server permissions")?;
        let grantee = self.grantee_id(ctx, RoleScope::Server, role).await?;
        self.list_permissions(ctx, PermissionTarget::Server, grantee, None).await
    }
}
