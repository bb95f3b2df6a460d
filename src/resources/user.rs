//! `user`: contained, login-mapped and Entra ID database users

use super::{gone_if_missing, ignore_missing, ManagedResource, ReadOutcome, ResourceKind};
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{PrincipalRef, User, UserUpdate};
use async_trait::async_trait;
use std::sync::Arc;

pub struct UserResource {
    connector: Arc<Connector>,
}

impl UserResource {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}

fn lookup(user: &User) -> PrincipalRef {
    if user.principal_id > 0 {
        PrincipalRef::by_id(user.principal_id)
    } else {
        PrincipalRef::by_name(&user.name)
    }
}

fn changed(prior: &str, desired: &str) -> Option<String> {
    (prior != desired).then(|| desired.to_string())
}

#[async_trait]
impl ManagedResource for UserResource {
    type State = User;

    fn kind(&self) -> ResourceKind {
        ResourceKind::User
    }

    async fn create(&self, ctx: &OpContext, desired: &User) -> Result<User> {
        let repo = self.connector.repository(ctx).await?;
        let mut created = repo.create_user(ctx, desired).await?;
        created.password = desired.password.clone();
        Ok(created)
    }

    async fn read(&self, ctx: &OpContext, current: &User) -> Result<ReadOutcome<User>> {
        let repo = self.connector.repository(ctx).await?;
        let found = gone_if_missing(
            self.kind(),
            &current.name,
            NotFoundKind::User,
            repo.get_user(ctx, &lookup(current)).await,
        )?;
        Ok(match found {
            ReadOutcome::Present(mut user) => {
                user.password = current.password.clone();
                ReadOutcome::Present(user)
            }
            ReadOutcome::Gone => ReadOutcome::Gone,
        })
    }

    async fn update(&self, ctx: &OpContext, prior: &User, desired: &User) -> Result<User> {
        if !prior.name.eq_ignore_ascii_case(&desired.name)
            || prior.contained != desired.contained
            || prior.external != desired.external
            || prior.object_id != desired.object_id
        {
            return Err(Error::invalid(
                "changing the name, containment, external flag or object id of a user requires replacing it",
            ));
        }
        let update = UserUpdate {
            password: desired
                .password
                .clone()
                .filter(|p| Some(p) != prior.password.as_ref()),
            default_schema: changed(&prior.default_schema, &desired.default_schema),
            default_language: changed(&prior.default_language, &desired.default_language),
            login_name: desired
                .login_name
                .clone()
                .filter(|l| Some(l) != prior.login_name.as_ref()),
        };

        let repo = self.connector.repository(ctx).await?;
        let mut user = if update.is_empty() {
            repo.get_user(ctx, &lookup(prior)).await?
        } else {
            repo.update_user(ctx, &prior.name, &update).await?
        };
        user.password = desired.password.clone();
        Ok(user)
    }

    async fn delete(&self, ctx: &OpContext, current: &User) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        ignore_missing(NotFoundKind::User, repo.delete_user(ctx, &current.name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeExecutor;
    use crate::db::EngineEdition;
    use crate::repo::test_support::contained_user_row;
    use crate::resources::test_support::provider;

    fn alice() -> User {
        User {
            name: "alice".into(),
            contained: true,
            password: Some("P@ssw0rd!".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_contained_user_end_to_end() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.database_principals", vec![contained_user_row(5, "alice")]);
        let handler = provider(&fake, EngineEdition::AzureSqlDatabase, "appdb").user();
        let ctx = OpContext::new();

        handler.create(&ctx, &alice()).await.unwrap();
        assert_eq!(fake.writes(), vec!["CREATE USER [alice] WITH PASSWORD = N'P@ssw0rd!'"]);

        let repo = handler.connector.repository(&ctx).await.unwrap();
        let user = repo.get_user(&ctx, &PrincipalRef::by_name("alice")).await.unwrap();
        assert_eq!(user.name, "alice");
        assert!(user.contained);
        assert!(!user.external);
        assert!(user.principal_id > 0);
        assert!(!user.sid.is_empty());
        assert_eq!(user.password, None);
        assert!(!serde_json::to_string(&user).unwrap().contains("P@ssw0rd!"));
    }

    #[tokio::test]
    async fn test_create_statement_is_not_logged_in_clear() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.database_principals", vec![contained_user_row(5, "alice")]);
        let handler = provider(&fake, EngineEdition::AzureSqlDatabase, "appdb").user();
        handler.create(&OpContext::new(), &alice()).await.unwrap();
        let create = fake
            .statements()
            .into_iter()
            .find(|s| s.sql.starts_with("CREATE USER"))
            .unwrap();
        assert_eq!(create.to_string(), "<redacted>");
    }

    #[tokio::test]
    async fn test_change_default_schema() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("sys.database_principals", vec![contained_user_row(5, "alice")]);
        let handler = provider(&fake, EngineEdition::AzureSqlDatabase, "appdb").user();
        let desired = User {
            default_schema: "sales".into(),
            ..alice()
        };
        handler.update(&OpContext::new(), &alice(), &desired).await.unwrap();
        assert_eq!(fake.writes(), vec!["ALTER USER [alice] WITH DEFAULT_SCHEMA = [sales]"]);
    }

    #[tokio::test]
    async fn test_containment_change_needs_replacement() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").user();
        let desired = User {
            contained: false,
            login_name: Some("alice".into()),
            password: None,
            ..alice()
        };
        let err = handler.update(&OpContext::new(), &alice(), &desired).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_import_is_not_supported() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").user();
        let err = handler.import(&OpContext::new(), "alice").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid input: import is not supported for user resources");
        assert!(fake.statements().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_user_succeeds() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").user();
        handler.delete(&OpContext::new(), &alice()).await.unwrap();
    }
}
