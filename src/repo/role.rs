//! Server and database roles and their membership

use super::Repository;
use crate::context::OpContext;
use crate::db::Record;
use crate::error::{Error, Result};
use crate::model::{is_fixed_role_name, Role, RoleScope, DBO};
use crate::sql::statements;
use crate::sql::validate_identifier;

fn role_from_record(rec: &Record) -> Result<Role> {
    Ok(Role {
        principal_id: rec.get_i64(0)?,
        name: rec.get_string(1)?,
        role_type: rec.get_code(2)?,
        type_description: rec.get_string(3)?,
        owning_principal: rec.get_string(4)?,
        is_fixed_role: rec.get_bool(5)?,
    })
}

fn fixed_role_error(scope: RoleScope, name: &str, action: &str) -> Error {
    let what = match scope {
        RoleScope::Server => "server role",
        RoleScope::Database => "database role",
    };
    Error::Forbidden(format!("cannot {} the fixed {} '{}'", action, what, name))
}

impl Repository {
    fn check_role_scope(&self, scope: RoleScope) -> Result<()> {
        match scope {
            RoleScope::Server => self.require_master("server roles"),
            RoleScope::Database => Ok(()),
        }
    }

    /// Create a role. Fixed roles are `Forbidden`, an existing role is `Conflict`.
    pub async fn create_role(&self, ctx: &OpContext, scope: RoleScope, role: &Role) -> Result<Role> {
        self.check_role_scope(scope)?;
        validate_identifier(&role.name)?;
        if is_fixed_role_name(scope, &role.name) {
            return Err(fixed_role_error(scope, &role.name, "create"));
        }
        match self.get_role(ctx, scope, &role.name).await {
            Ok(_) => {
                return Err(Error::Conflict(format!("role '{}' already exists", role.name)));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let owner = Some(role.owning_principal.as_str()).filter(|o| !o.is_empty());
        self.exec(ctx, &statements::create_role(scope, &role.name, owner)?).await?;
        tracing::info!(role = %role.name, ?scope, "created role");
        self.get_role(ctx, scope, &role.name).await
    }

    pub async fn get_role(&self, ctx: &OpContext, scope: RoleScope, name: &str) -> Result<Role> {
        self.check_role_scope(scope)?;
        validate_identifier(name)?;
        match self.fetch_one(ctx, &statements::select_role(scope, name)).await? {
            Some(rec) => role_from_record(&rec),
            None => Err(scope.not_found()),
        }
    }

    /// Rename and/or change the owner of `name` to match `desired`.
    pub async fn update_role(&self, ctx: &OpContext, scope: RoleScope, name: &str, desired: &Role) -> Result<Role> {
        self.check_role_scope(scope)?;
        validate_identifier(&desired.name)?;
        let current = self.get_role(ctx, scope, name).await?;

        let mut target = current.name.clone();
        if desired.name != current.name {
            if current.is_fixed_role {
                return Err(fixed_role_error(scope, &current.name, "rename"));
            }
            self.exec(ctx, &statements::rename_role(scope, &current.name, &desired.name)?)
                .await?;
            tracing::info!(from = %current.name, to = %desired.name, "renamed role");
            target = desired.name.clone();
        }
        if !desired.owning_principal.is_empty()
            && !desired.owning_principal.eq_ignore_ascii_case(&current.owning_principal)
        {
            if current.is_fixed_role {
                return Err(fixed_role_error(scope, &current.name, "change the owner of"));
            }
            self.exec(ctx, &statements::alter_role_owner(scope, &target, &desired.owning_principal)?)
                .await?;
        }
        self.get_role(ctx, scope, &target).await
    }

    pub async fn delete_role(&self, ctx: &OpContext, scope: RoleScope, name: &str) -> Result<()> {
        self.check_role_scope(scope)?;
        let current = self.get_role(ctx, scope, name).await?;
        if current.is_fixed_role || is_fixed_role_name(scope, name) {
            return Err(fixed_role_error(scope, name, "drop"));
        }
        self.exec(ctx, &statements::drop_role(scope, &current.name)?).await?;
        tracing::info!(role = %current.name, ?scope, "dropped role");
        Ok(())
    }

    // ---- membership ----

    /// Add `member` to `role`; an existing membership is not an error.
    pub async fn add_member(&self, ctx: &OpContext, scope: RoleScope, role: &str, member: &str) -> Result<()> {
        self.check_role_scope(scope)?;
        validate_identifier(role)?;
        validate_identifier(member)?;
        if scope == RoleScope::Database && member.eq_ignore_ascii_case(DBO) {
            return Err(Error::Forbidden("dbo cannot be added to a role".to_string()));
        }
        match self.exec(ctx, &statements::add_member(scope, role, member)?).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                tracing::debug!(%role, %member, "already a member");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove `member` from `role`; an absent member is not an error.
    pub async fn remove_member(&self, ctx: &OpContext, scope: RoleScope, role: &str, member: &str) -> Result<()> {
        self.check_role_scope(scope)?;
        validate_identifier(role)?;
        validate_identifier(member)?;
        if scope == RoleScope::Database && member.eq_ignore_ascii_case(DBO) {
            return Err(Error::Forbidden("dbo cannot be removed from a role".to_string()));
        }
        match self.exec(ctx, &statements::drop_member(scope, role, member)?).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_missing_member() => {
                tracing::debug!(%role, %member, "member already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Add each member in order, stopping at the first failure.
    pub async fn add_members(&self, ctx: &OpContext, scope: RoleScope, role: &str, members: &[String]) -> Result<()> {
        for member in members {
            self.add_member(ctx, scope, role, member).await?;
        }
        Ok(())
    }

    /// Remove each member in order, stopping at the first failure.
    pub async fn remove_members(&self, ctx: &OpContext, scope: RoleScope, role: &str, members: &[String]) -> Result<()> {
        for member in members {
            self.remove_member(ctx, scope, role, member).await?;
        }
        Ok(())
    }

    /// Members of `role` ordered by name. Fails with the role's `NotFound` if it is gone.
    pub async fn get_members(&self, ctx: &OpContext, scope: RoleScope, role: &str) -> Result<Vec<String>> {
        let role = self.get_role(ctx, scope, role).await?;
        let rows = self.fetch(ctx, &statements::select_members(scope, &role.name)).await?;
        rows.iter().map(|rec| rec.get_string(0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeExecutor;
    use crate::error::{classify_server_error, NotFoundKind};
    use crate::repo::test_support::{azure, boxed, boxed_master, name_rows, role_row};
    use std::sync::Arc;

    fn role(name: &str) -> Role {
        Role {
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_role() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![]);
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "app_readers", false)]);
        let repo = boxed(&fake);

        let created = repo
            .create_role(&OpContext::new(), RoleScope::Database, &role("app_readers"))
            .await
            .unwrap();
        assert_eq!(created.principal_id, 9);
        assert!(!created.is_fixed_role);
        assert_eq!(fake.writes(), vec!["CREATE ROLE [app_readers]"]);
    }

    #[tokio::test]
    async fn test_create_existing_role_is_conflict() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "app_readers", false)]);
        let repo = boxed(&fake);
        let err = repo
            .create_role(&OpContext::new(), RoleScope::Database, &role("app_readers"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_roles_cannot_be_created_or_dropped() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(16390, "db_datareader", true)]);
        let repo = boxed(&fake);
        let ctx = OpContext::new();

        let err = repo
            .create_role(&ctx, RoleScope::Database, &role("db_datareader"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = repo
            .delete_role(&ctx, RoleScope::Database, "db_datareader")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = repo
            .update_role(&ctx, RoleScope::Database, "db_datareader", &role("readers"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_missing_roles_use_scope_sentinel() {
        let fake = Arc::new(FakeExecutor::new());
        let ctx = OpContext::new();

        let err = boxed(&fake)
            .get_role(&ctx, RoleScope::Database, "gone")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "database role not found");

        let err = boxed_master(&fake)
            .get_role(&ctx, RoleScope::Server, "gone")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "server role not found");
    }

    #[tokio::test]
    async fn test_server_roles_require_master() {
        let fake = Arc::new(FakeExecutor::new());
        let ctx = OpContext::new();
        for repo in [boxed(&fake), azure(&fake, "appdb")] {
            let err = repo.get_members(&ctx, RoleScope::Server, "ops").await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_change_owner() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "old_name", false)]);
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "new_name", false)]);
        let repo = boxed(&fake);
        let desired = Role {
            name: "new_name".into(),
            owning_principal: "app_owner".into(),
            ..Default::default()
        };
        let updated = repo
            .update_role(&OpContext::new(), RoleScope::Database, "old_name", &desired)
            .await
            .unwrap();
        assert_eq!(updated.name, "new_name");
        assert_eq!(
            fake.writes(),
            vec![
                "ALTER ROLE [old_name] WITH NAME = [new_name]",
                "ALTER AUTHORIZATION ON ROLE::[new_name] TO [app_owner]",
            ]
        );
    }

    #[tokio::test]
    async fn test_add_existing_member_is_noop() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("ADD MEMBER", || classify_server_error(15023, "already a member"));
        let repo = boxed(&fake);
        repo.add_member(&OpContext::new(), RoleScope::Database, "app_readers", "alice")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_dropped_principal_is_noop() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("DROP MEMBER", || {
            classify_server_error(
                15151,
                "Cannot drop the principal 'carol', because it does not exist or you do not have permission.",
            )
        });
        let repo = boxed(&fake);
        repo.remove_member(&OpContext::new(), RoleScope::Database, "app_readers", "carol")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_member_of_missing_role_fails() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("DROP MEMBER", || {
            classify_server_error(
                15151,
                "Cannot alter the role 'app_readers', because it does not exist or you do not have permission.",
            )
        });
        let repo = boxed(&fake);
        let err = repo
            .remove_member(&OpContext::new(), RoleScope::Database, "app_readers", "carol")
            .await
            .unwrap_err();
        assert!(err.is_not_found_of(NotFoundKind::DatabaseRole));
    }

    #[tokio::test]
    async fn test_add_missing_principal_surfaces() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("ADD MEMBER", || {
            classify_server_error(
                15151,
                "Cannot add the principal 'ghost', because it does not exist or you do not have permission.",
            )
        });
        let repo = boxed(&fake);
        let err = repo
            .add_member(&OpContext::new(), RoleScope::Database, "app_readers", "ghost")
            .await
            .unwrap_err();
        assert!(err.is_not_found_of(NotFoundKind::Principal));
    }

    #[tokio::test]
    async fn test_dbo_membership_is_forbidden() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let err = repo
            .remove_member(&OpContext::new(), RoleScope::Database, "app_readers", "dbo")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_add_members_stops_at_first_error() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("ADD MEMBER [bob]", || classify_server_error(15247, "no permission"));
        let repo = boxed(&fake);
        let members = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let err = repo
            .add_members(&OpContext::new(), RoleScope::Database, "app_readers", &members)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(fake.writes(), vec!["ALTER ROLE [app_readers] ADD MEMBER [alice]"]);
    }

    #[tokio::test]
    async fn test_get_members() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "app_readers", false)]);
        fake.respond("role_members", name_rows(&["bob", "carol", "dbo"]));
        let repo = boxed(&fake);
        let members = repo
            .get_members(&OpContext::new(), RoleScope::Database, "app_readers")
            .await
            .unwrap();
        assert_eq!(members, vec!["bob", "carol", "dbo"]);
    }
}
