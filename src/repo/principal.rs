//! Logins and database users

use super::Repository;
use crate::context::OpContext;
use crate::db::Record;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{Login, LoginUpdate, PrincipalRef, User, UserUpdate, DBO};
use crate::sql::statements;
use crate::sql::validate_identifier;

/// Users the backend creates in every database
const SYSTEM_USERS: &[&str] = &[DBO, "guest", "sys", "INFORMATION_SCHEMA"];

fn login_from_record(rec: &Record) -> Result<Login> {
    let login_type = rec.get_code(2)?;
    Ok(Login {
        principal_id: rec.get_i64(0)?,
        name: rec.get_string(1)?,
        external: matches!(login_type.as_str(), "E" | "X"),
        login_type,
        disabled: rec.get_bool(3)?,
        password: None,
        default_database: rec.get_string(4)?,
        default_language: rec.get_string(5)?,
    })
}

fn user_from_record(rec: &Record) -> Result<User> {
    let user_type = rec.get_code(2)?;
    let authentication_type = rec.get_i64(3)?;
    let login_name = rec.get_opt_string(4)?;
    let external = matches!(user_type.as_str(), "E" | "X");
    // 2 = DATABASE (password), 4 = EXTERNAL; external users with a login are login-mapped
    let contained = authentication_type == 2 || (external && login_name.is_none());
    Ok(User {
        principal_id: rec.get_i64(0)?,
        name: rec.get_string(1)?,
        contained,
        external,
        login_name: if contained { None } else { login_name },
        password: None,
        default_schema: rec.get_string(5)?,
        default_language: rec.get_string(6)?,
        sid: rec.get_string(7)?,
        object_id: rec.get_opt_string(8)?.map(|id| id.to_lowercase()),
    })
}

impl Repository {
    // ---- logins ----

    pub async fn create_login(&self, ctx: &OpContext, login: &Login) -> Result<Login> {
        self.require_login_catalog()?;
        validate_identifier(&login.name)?;
        let stmt = statements::create_login(login, !self.server.is_contained())?;
        self.exec(ctx, &stmt).await?;
        if login.disabled {
            self.exec(ctx, &statements::set_login_disabled(&login.name, true)?).await?;
        }
        tracing::info!(login = %login.name, external = login.external, "created login");
        self.get_login(ctx, &PrincipalRef::by_name(&login.name)).await
    }

    /// Read a login by principal id (preferred) or name.
    pub async fn get_login(&self, ctx: &OpContext, lookup: &PrincipalRef) -> Result<Login> {
        self.require_login_catalog()?;
        let stmt = match (lookup.principal_id, lookup.name.as_deref()) {
            (Some(id), _) => statements::select_login_by_id(id),
            (None, Some(name)) if !name.is_empty() => {
                validate_identifier(name)?;
                statements::select_login_by_name(name)
            }
            _ => return Err(Error::invalid("a login name or principal id is required")),
        };
        match self.fetch_one(ctx, &stmt).await? {
            Some(rec) => login_from_record(&rec),
            None => Err(Error::NotFound(NotFoundKind::Login)),
        }
    }

    /// Apply the fields set in `update`; everything else is left unchanged.
    pub async fn update_login(&self, ctx: &OpContext, name: &str, update: &LoginUpdate) -> Result<Login> {
        self.require_login_catalog()?;
        validate_identifier(name)?;
        let current = self.get_login(ctx, &PrincipalRef::by_name(name)).await?;
        if current.external && update.password.is_some() {
            return Err(Error::invalid("an external login has no password"));
        }
        for stmt in statements::alter_login(name, update, !self.server.is_contained())? {
            self.exec(ctx, &stmt).await?;
        }
        self.get_login(ctx, &PrincipalRef::by_id(current.principal_id)).await
    }

    /// Drop a login. Dependent users make the backend refuse with `Conflict`.
    pub async fn delete_login(&self, ctx: &OpContext, name: &str) -> Result<()> {
        self.require_login_catalog()?;
        validate_identifier(name)?;
        self.get_login(ctx, &PrincipalRef::by_name(name)).await?;
        self.exec(ctx, &statements::drop_login(name)?).await?;
        tracing::info!(login = %name, "dropped login");
        Ok(())
    }

    // ---- users ----

    pub async fn create_user(&self, ctx: &OpContext, user: &User) -> Result<User> {
        validate_identifier(&user.name)?;
        user.validate_variant()?;
        let stmt = statements::create_user(user)?;
        self.exec(ctx, &stmt).await?;
        tracing::info!(user = %user.name, contained = user.contained, external = user.external, "created user");
        self.get_user(ctx, &PrincipalRef::by_name(&user.name)).await
    }

    /// Read a user by principal id or name; principal id 0 addresses `dbo`.
    pub async fn get_user(&self, ctx: &OpContext, lookup: &PrincipalRef) -> Result<User> {
        let stmt = match (lookup.principal_id, lookup.name.as_deref()) {
            (Some(0), _) => statements::select_user_by_name(DBO),
            (Some(id), _) => statements::select_user_by_id(id),
            (None, Some(name)) if !name.is_empty() => {
                validate_identifier(name)?;
                statements::select_user_by_name(name)
            }
            _ => return Err(Error::invalid("a user name or principal id is required")),
        };
        match self.fetch_one(ctx, &stmt).await? {
            Some(rec) => user_from_record(&rec),
            None => Err(Error::NotFound(NotFoundKind::User)),
        }
    }

    pub async fn update_user(&self, ctx: &OpContext, name: &str, update: &UserUpdate) -> Result<User> {
        validate_identifier(name)?;
        let current = self.get_user(ctx, &PrincipalRef::by_name(name)).await?;

        if update.password.is_some() && !(current.contained && !current.external) {
            return Err(Error::invalid("a password can only be set for a contained user"));
        }
        if update.default_language.is_some() && !current.contained {
            return Err(Error::invalid("default_language can only be set for a contained user"));
        }
        if update.login_name.is_some() && current.contained {
            return Err(Error::invalid("a contained user cannot be mapped to a login"));
        }

        if let Some(stmt) = statements::alter_user(name, update)? {
            self.exec(ctx, &stmt).await?;
        }
        self.get_user(ctx, &PrincipalRef::by_id(current.principal_id)).await
    }

    pub async fn delete_user(&self, ctx: &OpContext, name: &str) -> Result<()> {
        validate_identifier(name)?;
        if SYSTEM_USERS.iter().any(|u| u.eq_ignore_ascii_case(name)) {
            return Err(Error::Forbidden(format!("the built-in user '{}' cannot be dropped", name)));
        }
        self.get_user(ctx, &PrincipalRef::by_name(name)).await?;
        self.exec(ctx, &statements::drop_user(name)?).await?;
        tracing::info!(user = %name, "dropped user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeExecutor;
    use crate::db::CellValue;
    use crate::repo::test_support::{azure, boxed, contained_user_row, login_row};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_read_login() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.server_principals", vec![login_row(301, "svc_app", "S", false)]);
        let repo = boxed(&fake);

        let login = Login {
            name: "svc_app".into(),
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        };
        let created = repo.create_login(&OpContext::new(), &login).await.unwrap();
        assert_eq!(created.principal_id, 301);
        assert_eq!(created.password, None);
        assert!(!created.external);
        assert_eq!(fake.writes(), vec!["CREATE LOGIN [svc_app] WITH PASSWORD = N'P@ssw0rd!'"]);
    }

    #[tokio::test]
    async fn test_create_disabled_login() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.server_principals", vec![login_row(302, "batch", "S", true)]);
        let repo = boxed(&fake);
        let login = Login {
            name: "batch".into(),
            password: Some("P@ssw0rd!".into()),
            disabled: true,
            ..Default::default()
        };
        let created = repo.create_login(&OpContext::new(), &login).await.unwrap();
        assert!(created.disabled);
        assert_eq!(fake.writes()[1], "ALTER LOGIN [batch] DISABLE");
    }

    #[tokio::test]
    async fn test_get_login_requires_key() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let err = repo
            .get_login(&OpContext::new(), &PrincipalRef::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_login_is_not_found() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let err = repo
            .get_login(&OpContext::new(), &PrincipalRef::by_name("ghost"))
            .await
            .unwrap_err();
        assert!(err.is_not_found_of(NotFoundKind::Login));
        assert_eq!(err.to_string(), "login not found");
    }

    #[tokio::test]
    async fn test_logins_rejected_in_azure_user_database() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = azure(&fake, "appdb");
        let login = Login {
            name: "svc".into(),
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        };
        let err = repo.create_login(&OpContext::new(), &login).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_azure_master_login_without_defaults() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.server_principals", vec![login_row(5, "svc", "S", false)]);
        let repo = azure(&fake, "master");
        let mut login = Login {
            name: "svc".into(),
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        };
        repo.create_login(&OpContext::new(), &login).await.unwrap();

        login.default_database = "appdb".into();
        let err = repo.create_login(&OpContext::new(), &login).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_update_login_leaves_unset_fields() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.server_principals", vec![login_row(301, "svc_app", "S", false)]);
        let repo = boxed(&fake);
        let update = LoginUpdate {
            password: Some("N3w-P@ss".into()),
            ..Default::default()
        };
        repo.update_login(&OpContext::new(), "svc_app", &update).await.unwrap();
        assert_eq!(fake.writes(), vec!["ALTER LOGIN [svc_app] WITH PASSWORD = N'N3w-P@ss'"]);
    }

    #[tokio::test]
    async fn test_delete_missing_login() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let err = repo.delete_login(&OpContext::new(), "ghost").await.unwrap_err();
        assert!(err.is_not_found_of(NotFoundKind::Login));
        assert!(fake.writes().is_empty());
    }

    #[tokio::test]
    async fn test_delete_login_with_users_is_conflict() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.server_principals", vec![login_row(301, "svc_app", "S", false)]);
        fake.fail("DROP LOGIN", || {
            crate::error::classify_server_error(15174, "Login 'svc_app' owns one or more database(s).")
        });
        let repo = boxed(&fake);
        let err = repo.delete_login(&OpContext::new(), "svc_app").await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_contained_user() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.database_principals", vec![contained_user_row(5, "alice")]);
        let repo = azure(&fake, "appdb");
        let user = User {
            name: "alice".into(),
            contained: true,
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        };
        let created = repo.create_user(&OpContext::new(), &user).await.unwrap();
        assert_eq!(created.name, "alice");
        assert!(created.contained);
        assert!(!created.external);
        assert!(created.principal_id > 0);
        assert!(!created.sid.is_empty());
        assert_eq!(created.password, None);
    }

    #[tokio::test]
    async fn test_user_password_requires_contained() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let user = User {
            name: "bob".into(),
            login_name: Some("bob".into()),
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        };
        let err = repo.create_user(&OpContext::new(), &user).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_get_user_zero_is_dbo() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let _ = repo.get_user(&OpContext::new(), &PrincipalRef::by_id(0)).await;
        let stmts = fake.statements();
        assert_eq!(stmts[0].params, vec![crate::db::Param::Str("dbo".into())]);
    }

    #[tokio::test]
    async fn test_update_user_language_only_contained() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond(
            "sys.database_principals",
            vec![Record::new(vec![
                CellValue::Int(7),
                CellValue::String("bob".into()),
                CellValue::String("S".into()),
                CellValue::Int(1),
                CellValue::String("bob_login".into()),
                CellValue::String("dbo".into()),
                CellValue::Null,
                CellValue::String("0x01".into()),
                CellValue::String(String::new()),
            ])],
        );
        let repo = boxed(&fake);
        let update = UserUpdate {
            default_language: Some("British".into()),
            ..Default::default()
        };
        let err = repo.update_user(&OpContext::new(), "bob", &update).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let user = repo.get_user(&OpContext::new(), &PrincipalRef::by_name("bob")).await.unwrap();
        assert!(!user.contained);
        assert_eq!(user.login_name.as_deref(), Some("bob_login"));
    }

    #[tokio::test]
    async fn test_builtin_users_cannot_be_dropped() {
        let fake = Arc::new(FakeExecutor::new());
        let repo = boxed(&fake);
        let err = repo.delete_user(&OpContext::new(), "DBO").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }
}
