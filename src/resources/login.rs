//! `login`: server logins, SQL-authenticated or from an external provider

use super::{gone_if_missing, ignore_missing, ManagedResource, ReadOutcome, ResourceKind};
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::{Login, LoginUpdate, PrincipalRef};
use async_trait::async_trait;
use std::sync::Arc;

pub struct LoginResource {
    connector: Arc<Connector>,
}

impl LoginResource {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}

fn lookup(login: &Login) -> PrincipalRef {
    if login.principal_id > 0 {
        PrincipalRef::by_id(login.principal_id)
    } else {
        PrincipalRef::by_name(&login.name)
    }
}

fn changed(prior: &str, desired: &str) -> Option<String> {
    (prior != desired).then(|| desired.to_string())
}

#[async_trait]
impl ManagedResource for LoginResource {
    type State = Login;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Login
    }

    async fn create(&self, ctx: &OpContext, desired: &Login) -> Result<Login> {
        let repo = self.connector.repository(ctx).await?;
        let mut created = repo.create_login(ctx, desired).await?;
        created.password = desired.password.clone();
        Ok(created)
    }

    async fn read(&self, ctx: &OpContext, current: &Login) -> Result<ReadOutcome<Login>> {
        let repo = self.connector.repository(ctx).await?;
        let found = gone_if_missing(
            self.kind(),
            &current.name,
            NotFoundKind::Login,
            repo.get_login(ctx, &lookup(current)).await,
        )?;
        // the password is write-only; keep what the orchestrator last set
        Ok(match found {
            ReadOutcome::Present(mut login) => {
                login.password = current.password.clone();
                ReadOutcome::Present(login)
            }
            ReadOutcome::Gone => ReadOutcome::Gone,
        })
    }

    async fn update(&self, ctx: &OpContext, prior: &Login, desired: &Login) -> Result<Login> {
        if !prior.name.eq_ignore_ascii_case(&desired.name) || prior.external != desired.external {
            return Err(Error::invalid(
                "changing the name or external flag of a login requires replacing it",
            ));
        }
        let update = LoginUpdate {
            password: desired
                .password
                .clone()
                .filter(|p| Some(p) != prior.password.as_ref()),
            default_database: changed(&prior.default_database, &desired.default_database),
            default_language: changed(&prior.default_language, &desired.default_language),
            disabled: (prior.disabled != desired.disabled).then_some(desired.disabled),
        };

        let repo = self.connector.repository(ctx).await?;
        let mut login = if update.is_empty() {
            repo.get_login(ctx, &lookup(prior)).await?
        } else {
            repo.update_login(ctx, &prior.name, &update).await?
        };
        login.password = desired.password.clone();
        Ok(login)
    }

    async fn delete(&self, ctx: &OpContext, current: &Login) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        ignore_missing(NotFoundKind::Login, repo.delete_login(ctx, &current.name).await)
    }

    async fn import(&self, ctx: &OpContext, id: &str) -> Result<Login> {
        let repo = self.connector.repository(ctx).await?;
        repo.get_login(ctx, &PrincipalRef::by_name(id)).await
    }
}
